use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Response, StatusCode};
use std::io;

/// A response being written: mutable headers, a status line sent at most
/// once, and an ordered byte sink.
pub trait ResponseWriter {
    /// Headers to be sent with the status line.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Sends the status line and headers.
    fn write_header(&mut self, status: StatusCode) -> io::Result<()>;

    /// Writes body bytes, sending a `200 OK` head first if none was sent.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Pushes buffered bytes towards the client.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: ResponseWriter + ?Sized> ResponseWriter for &mut W {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        (**self).headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) -> io::Result<()> {
        (**self).write_header(status)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// An in-memory [`ResponseWriter`].
///
/// The first `write_header` wins and snapshots the headers; later header
/// mutations are not part of the recorded response.
#[derive(Debug, Default)]
pub struct ResponseRecorder {
    headers: HeaderMap,
    head: Option<(StatusCode, HeaderMap)>,
    body: BytesMut,
    flushes: usize,
}

impl ResponseRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Status sent, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.head.as_ref().map(|(status, _)| *status)
    }

    /// Headers as sent, or as currently set if nothing was sent yet.
    pub fn headers(&self) -> &HeaderMap {
        match &self.head {
            Some((_, headers)) => headers,
            None => &self.headers,
        }
    }

    /// Body bytes written so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Number of `flush` calls seen.
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Converts the recording into a response. An unsent head becomes `200 OK`.
    pub fn into_response(self) -> Response<Bytes> {
        let (status, headers) = self.head.unwrap_or((StatusCode::OK, self.headers));
        let mut response = Response::new(self.body.freeze());
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

impl ResponseWriter for ResponseRecorder {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) -> io::Result<()> {
        if self.head.is_none() {
            self.head = Some((status, self.headers.clone()));
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.head.is_none() {
            self.write_header(StatusCode::OK)?;
        }
        self.body.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderValue, header};

    #[test]
    fn test_write_implies_ok() {
        let mut recorder = ResponseRecorder::new();
        recorder.write(b"hello").unwrap();
        assert_eq!(recorder.status(), Some(StatusCode::OK));
        assert_eq!(recorder.body(), b"hello");
    }

    #[test]
    fn test_first_status_wins() {
        let mut recorder = ResponseRecorder::new();
        recorder.write_header(StatusCode::CREATED).unwrap();
        recorder.write_header(StatusCode::NOT_FOUND).unwrap();
        assert_eq!(recorder.status(), Some(StatusCode::CREATED));
    }

    #[test]
    fn test_headers_frozen_at_write_header() {
        let mut recorder = ResponseRecorder::new();
        recorder
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        recorder.write_header(StatusCode::OK).unwrap();
        recorder
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from_static("3"));

        let response = recorder.into_response();
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "text/plain");
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
    }

    #[test]
    fn test_into_response_without_head() {
        let response = ResponseRecorder::new().into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.body().is_empty());
    }

    #[test]
    fn test_mut_ref_forwards() {
        let mut recorder = ResponseRecorder::new();
        {
            let mut writer: &mut dyn ResponseWriter = &mut recorder;
            ResponseWriter::write(&mut writer, b"abc").unwrap();
            ResponseWriter::flush(&mut writer).unwrap();
        }
        assert_eq!(recorder.body(), b"abc");
        assert_eq!(recorder.flushes(), 1);
    }
}
