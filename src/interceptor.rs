use crate::decision::{self, RequestFacts, ResponseFacts, Verdict};
use crate::error::Error;
use crate::policy::Policy;
use crate::stream::{BodyStream, CompressionStream};
use crate::writer::ResponseWriter;
use bytes::BytesMut;
use http::{HeaderMap, StatusCode};
use std::io;
use std::mem;
use std::sync::Arc;

enum State {
    /// Holding back the head and early body bytes until a verdict.
    Buffering(BytesMut),
    /// Head sent; body flows through the chosen stream.
    Streaming(BodyStream),
    Closed,
}

/// Wraps a [`ResponseWriter`] and gzips the body when the [`Policy`] allows.
///
/// The status line and headers are held back until the decision can be
/// made, then sent exactly once. Header changes made after that point are
/// not sent.
///
/// Call [`close`](Self::close) once the handler is done. Dropping an
/// interceptor without closing it releases the compressor but leaves the
/// body truncated.
pub struct ResponseInterceptor<W: ResponseWriter> {
    inner: W,
    policy: Arc<Policy>,
    request: RequestFacts,
    headers: HeaderMap,
    status: Option<StatusCode>,
    /// Body bytes have been written, so the status can no longer change.
    body_started: bool,
    verdict: Verdict,
    state: State,
}

impl<W: ResponseWriter> ResponseInterceptor<W> {
    /// Wraps `inner` for a request described by `request`.
    pub fn new(mut inner: W, policy: Arc<Policy>, request: RequestFacts) -> Self {
        let headers = inner.headers_mut().clone();
        Self {
            inner,
            policy,
            request,
            headers,
            status: None,
            body_started: false,
            verdict: Verdict::Undecided,
            state: State::Buffering(BytesMut::new()),
        }
    }

    /// The verdict committed for this response, if any.
    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    /// Returns `true` once the response has been closed.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Returns a reference to the wrapped writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Consumes the interceptor, returning the wrapped writer.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Ends the response.
    ///
    /// A response still buffering is decided now (too small bodies go out as
    /// written), then the gzip footer is written and the compressor released.
    /// Closing again is a no-op.
    pub fn close(&mut self) -> io::Result<()> {
        if matches!(self.state, State::Buffering(_)) {
            self.status.get_or_insert(StatusCode::OK);
            self.evaluate(true)?;
        }
        match mem::replace(&mut self.state, State::Closed) {
            State::Streaming(stream) => stream.finish(&mut self.inner),
            State::Buffering(_) | State::Closed => Ok(()),
        }
    }

    /// Consults the decision engine and commits a terminal verdict.
    fn evaluate(&mut self, finished: bool) -> io::Result<()> {
        let State::Buffering(buffer) = &self.state else {
            return Ok(());
        };

        let facts = ResponseFacts {
            status: self.status,
            headers: &self.headers,
            buffered: buffer.len(),
            expected_len: decision::content_length(&self.headers),
            finished,
        };
        let verdict = decision::decide(&self.request, &facts, &self.policy);
        if !verdict.is_decided() {
            return Ok(());
        }
        self.commit(verdict)
    }

    /// Sends the head, then drains the buffer through the chosen stream.
    fn commit(&mut self, verdict: Verdict) -> io::Result<()> {
        let status = self.status.unwrap_or(StatusCode::OK);
        let buffer = match mem::replace(&mut self.state, State::Closed) {
            State::Buffering(buffer) => buffer,
            other => {
                self.state = other;
                return Ok(());
            }
        };

        tracing::debug!(
            status = status.as_u16(),
            ?verdict,
            buffered = buffer.len(),
            "response encoding decided"
        );

        self.verdict = verdict;
        decision::finalize_headers(&mut self.headers, verdict);
        *self.inner.headers_mut() = self.headers.clone();
        self.inner.write_header(status)?;

        let mut stream = match verdict {
            Verdict::Compress => {
                BodyStream::Compressing(CompressionStream::new(self.policy.level()))
            }
            _ => BodyStream::Passthrough,
        };
        if !buffer.is_empty() {
            stream.write(&mut self.inner, &buffer)?;
        }
        self.state = State::Streaming(stream);
        Ok(())
    }

    /// Marks the response closed after an unrecoverable error.
    fn fail(&mut self, err: io::Error) -> io::Error {
        self.state = State::Closed;
        err
    }
}

impl<W: ResponseWriter> ResponseWriter for ResponseInterceptor<W> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) -> io::Result<()> {
        // The head counts as sent once the body starts, buffered or not
        if self.body_started || !matches!(self.state, State::Buffering(_)) {
            return Ok(());
        }
        self.status = Some(status);
        self.evaluate(false).map_err(|err| self.fail(err))
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let result = match &mut self.state {
            State::Closed => return Err(Error::Closed.into()),
            State::Streaming(stream) => stream.write(&mut self.inner, data),
            State::Buffering(buffer) => {
                buffer.extend_from_slice(data);
                self.body_started = true;
                self.status.get_or_insert(StatusCode::OK);
                self.evaluate(false)
            }
        };
        result.map_err(|err| self.fail(err))
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = match &mut self.state {
            State::Streaming(stream) => stream.flush(&mut self.inner),
            State::Buffering(_) | State::Closed => Ok(()),
        };
        result.map_err(|err| self.fail(err))
    }
}

impl<W: ResponseWriter> io::Write for ResponseInterceptor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ResponseWriter::write(self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        ResponseWriter::flush(self)
    }
}
