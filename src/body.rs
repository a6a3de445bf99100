use crate::codec::Compressor;
use crate::error::{BoxError, Error};
use bytes::{Buf, Bytes, BytesMut};
use compression_core::Level;
use http::HeaderMap;
use http_body::{Body, Frame, SizeHint};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Body frames read ahead while the compression decision was pending.
#[derive(Debug, Default)]
pub struct Prefetched {
    pub(crate) data: Option<Bytes>,
    pub(crate) trailers: Option<HeaderMap>,
    pub(crate) error: Option<Error>,
    /// The inner body has already returned its last frame.
    pub(crate) end: bool,
}

impl Prefetched {
    fn data_len(&self) -> u64 {
        self.data.as_ref().map_or(0, |d| d.len() as u64)
    }
}

/// A response body that may be compressed.
///
/// Bytes read ahead while deciding are replayed first; the rest of the inner
/// body follows, either gzipped or unchanged.
#[allow(missing_docs)]
pub enum CompressionBody<B> {
    /// Compressed body with encoder.
    Compressed {
        inner: Pin<Box<B>>,
        state: CompressedBody,
    },
    /// Passthrough body without compression.
    Passthrough {
        inner: Pin<Box<B>>,
        prefetched: Prefetched,
    },
}

/// State and buffers for an actively compressed body.
pub struct CompressedBody {
    compressor: Compressor,
    always_flush: bool,
    state: CompressState,
    prefetched: Prefetched,
}

/// State machine for compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompressState {
    /// Reading data from inner body and compressing.
    Reading,
    /// Finishing compression after inner body is done.
    Finishing,
    /// Emitting buffered trailers.
    Trailers,
    /// Compression is complete.
    Done,
}

impl CompressedBody {
    fn new(level: Level, always_flush: bool, prefetched: Prefetched) -> Self {
        Self {
            compressor: Compressor::new(level),
            always_flush,
            state: CompressState::Reading,
            prefetched,
        }
    }

    /// Returns the current compression state.
    pub(crate) fn state(&self) -> CompressState {
        self.state
    }

    /// Polls the inner body and compresses data.
    fn poll_compressed<B>(
        &mut self,
        cx: &mut Context<'_>,
        inner: Pin<&mut B>,
    ) -> Poll<Option<Result<Frame<Bytes>, Error>>>
    where
        B: Body,
        B::Data: Buf,
        B::Error: Into<BoxError>,
    {
        let mut inner = inner;
        loop {
            match self.state {
                CompressState::Done => return Poll::Ready(None),

                CompressState::Trailers => {
                    self.state = CompressState::Done;
                    if let Some(trailers) = self.prefetched.trailers.take() {
                        return Poll::Ready(Some(Ok(Frame::trailers(trailers))));
                    }
                }

                CompressState::Finishing => {
                    let mut output = BytesMut::new();
                    let finished = self.compressor.finish(|chunk| {
                        output.extend_from_slice(chunk);
                        Ok(())
                    });
                    if let Err(e) = finished {
                        self.state = CompressState::Done;
                        return Poll::Ready(Some(Err(e)));
                    }
                    self.state = CompressState::Trailers;
                    if !output.is_empty() {
                        return Poll::Ready(Some(Ok(Frame::data(output.freeze()))));
                    }
                }

                CompressState::Reading => {
                    if let Some(data) = self.prefetched.data.take() {
                        match self.compress_chunk(&data) {
                            Ok(Some(out)) => return Poll::Ready(Some(Ok(Frame::data(out)))),
                            Ok(None) => continue,
                            Err(e) => return self.fail(e),
                        }
                    }
                    if self.prefetched.end {
                        self.state = CompressState::Finishing;
                        continue;
                    }

                    match inner.as_mut().poll_frame(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(None) => {
                            self.state = CompressState::Finishing;
                        }
                        Poll::Ready(Some(Err(e))) => {
                            return self.fail(Error::Body(e.into()));
                        }
                        Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                            Ok(mut data) => {
                                let input = data.copy_to_bytes(data.remaining());
                                match self.compress_chunk(&input) {
                                    Ok(Some(out)) => {
                                        return Poll::Ready(Some(Ok(Frame::data(out))));
                                    }
                                    Ok(None) => {}
                                    Err(e) => return self.fail(e),
                                }
                            }
                            Err(frame) => {
                                // Buffer trailers and finish compression first
                                if let Ok(trailers) = frame.into_trailers() {
                                    self.prefetched.trailers = Some(trailers);
                                    self.state = CompressState::Finishing;
                                }
                            }
                        },
                    }
                }
            }
        }
    }

    /// Compresses a chunk of input data, returning whatever output is ready.
    fn compress_chunk(&mut self, input: &[u8]) -> Result<Option<Bytes>, Error> {
        let mut all_output = BytesMut::new();
        let mut collect = |chunk: &[u8]| -> std::io::Result<()> {
            all_output.extend_from_slice(chunk);
            Ok(())
        };

        self.compressor.encode(input, &mut collect)?;
        if self.always_flush {
            self.compressor.flush(&mut collect)?;
        }

        if all_output.is_empty() {
            Ok(None)
        } else {
            Ok(Some(all_output.freeze()))
        }
    }

    fn fail(&mut self, err: Error) -> Poll<Option<Result<Frame<Bytes>, Error>>> {
        self.state = CompressState::Done;
        Poll::Ready(Some(Err(err)))
    }
}

impl<B> CompressionBody<B> {
    /// Creates a compressed body that first encodes `prefetched`.
    pub(crate) fn compressed(
        inner: Pin<Box<B>>,
        level: Level,
        always_flush: bool,
        prefetched: Prefetched,
    ) -> Self {
        Self::Compressed {
            inner,
            state: CompressedBody::new(level, always_flush, prefetched),
        }
    }

    /// Creates a passthrough body that first replays `prefetched`.
    pub(crate) fn passthrough(inner: Pin<Box<B>>, prefetched: Prefetched) -> Self {
        Self::Passthrough { inner, prefetched }
    }
}

impl<B> Body for CompressionBody<B>
where
    B: Body,
    B::Data: Buf,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            CompressionBody::Passthrough { inner, prefetched } => {
                if let Some(data) = prefetched.data.take() {
                    return Poll::Ready(Some(Ok(Frame::data(data))));
                }
                if let Some(err) = prefetched.error.take() {
                    prefetched.end = true;
                    return Poll::Ready(Some(Err(err)));
                }
                if prefetched.end {
                    let trailers = prefetched.trailers.take();
                    return Poll::Ready(trailers.map(|t| Ok(Frame::trailers(t))));
                }

                // Pass through frames, converting data to Bytes
                match inner.as_mut().poll_frame(cx) {
                    Poll::Pending => Poll::Pending,
                    Poll::Ready(None) => Poll::Ready(None),
                    Poll::Ready(Some(Ok(frame))) => {
                        let frame =
                            frame.map_data(|mut data| data.copy_to_bytes(data.remaining()));
                        Poll::Ready(Some(Ok(frame)))
                    }
                    Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(Error::Body(e.into())))),
                }
            }
            CompressionBody::Compressed { inner, state } => {
                state.poll_compressed(cx, inner.as_mut())
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            CompressionBody::Passthrough { inner, prefetched } => {
                prefetched.data.is_none()
                    && prefetched.error.is_none()
                    && if prefetched.end {
                        prefetched.trailers.is_none()
                    } else {
                        inner.is_end_stream()
                    }
            }
            CompressionBody::Compressed { state, .. } => state.state() == CompressState::Done,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            CompressionBody::Passthrough { inner, prefetched } => {
                let replay = prefetched.data_len();
                if prefetched.end {
                    return SizeHint::with_exact(replay);
                }
                let inner = inner.size_hint();
                let mut hint = SizeHint::new();
                if let Some(upper) = inner.upper() {
                    hint.set_upper(upper + replay);
                }
                hint.set_lower(inner.lower() + replay);
                hint
            }
            // Compressed size is unknown
            CompressionBody::Compressed { .. } => SizeHint::default(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use http_body_util::BodyExt;
    use std::collections::VecDeque;
    use std::io::Read;

    /// A test body that yields predefined frames.
    pub(crate) struct TestBody {
        frames: VecDeque<Result<Frame<Bytes>, &'static str>>,
    }

    impl TestBody {
        pub(crate) fn new(frames: Vec<Frame<Bytes>>) -> Self {
            Self {
                frames: frames.into_iter().map(Ok).collect(),
            }
        }

        pub(crate) fn failing(frames: Vec<Frame<Bytes>>, error: &'static str) -> Self {
            let mut body = Self::new(frames);
            body.frames.push_back(Err(error));
            body
        }
    }

    impl Body for TestBody {
        type Data = Bytes;
        type Error = BoxError;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
            Poll::Ready(self.frames.pop_front().map(|f| f.map_err(Into::into)))
        }
    }

    fn poll_body<B: Body + Unpin>(body: &mut B) -> Option<Result<Frame<B::Data>, B::Error>> {
        let waker = std::task::Waker::noop();
        let mut cx = Context::from_waker(waker);
        match Pin::new(body).poll_frame(&mut cx) {
            Poll::Ready(result) => result,
            Poll::Pending => None,
        }
    }

    fn drain<B: Body<Data = Bytes> + Unpin>(body: &mut B) -> (Vec<u8>, Option<HeaderMap>) {
        let mut data = Vec::new();
        let mut trailers = None;
        while let Some(Ok(frame)) = poll_body(body) {
            match frame.into_data() {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(frame) => trailers = frame.into_trailers().ok(),
            }
        }
        (data, trailers)
    }

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    fn checksum_trailers() -> HeaderMap {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", "abc123".parse().unwrap());
        trailers
    }

    #[test]
    fn test_passthrough_replays_prefetched_first() {
        let inner = TestBody::new(vec![Frame::data(Bytes::from(" world"))]);
        let prefetched = Prefetched {
            data: Some(Bytes::from("hello")),
            ..Default::default()
        };
        let mut body = CompressionBody::passthrough(Box::pin(inner), prefetched);
        assert_eq!(drain(&mut body).0, b"hello world");
        assert!(poll_body(&mut body).is_none());
    }

    #[test]
    fn test_passthrough_trailers() {
        let inner = TestBody::new(vec![
            Frame::data(Bytes::from("data")),
            Frame::trailers(checksum_trailers()),
        ]);
        let mut body = CompressionBody::passthrough(Box::pin(inner), Prefetched::default());

        let (data, trailers) = drain(&mut body);
        assert_eq!(data, b"data");
        assert_eq!(trailers.unwrap().get("x-checksum").unwrap(), "abc123");
    }

    #[test]
    fn test_passthrough_ended_prefetch_does_not_repoll() {
        // An inner body that would yield more if polled again
        let inner = TestBody::new(vec![Frame::data(Bytes::from("unreachable"))]);
        let prefetched = Prefetched {
            data: Some(Bytes::from("all")),
            trailers: Some(checksum_trailers()),
            end: true,
            ..Default::default()
        };
        let mut body = CompressionBody::passthrough(Box::pin(inner), prefetched);
        assert_eq!(body.size_hint().exact(), Some(3));

        let (data, trailers) = drain(&mut body);
        assert_eq!(data, b"all");
        assert!(trailers.is_some());
        assert!(body.is_end_stream());
    }

    #[test]
    fn test_passthrough_replays_prefetched_error() {
        let inner = TestBody::new(vec![]);
        let prefetched = Prefetched {
            data: Some(Bytes::from("partial")),
            error: Some(Error::Body("boom".into())),
            ..Default::default()
        };
        let mut body = CompressionBody::passthrough(Box::pin(inner), prefetched);
        assert!(poll_body(&mut body).unwrap().is_ok());
        assert!(matches!(poll_body(&mut body), Some(Err(Error::Body(_)))));
        assert!(poll_body(&mut body).is_none());
    }

    #[test]
    fn test_compressed_round_trip_with_prefetch() {
        let inner = TestBody::new(vec![
            Frame::data(Bytes::from(" gzip")),
            Frame::data(Bytes::from(" world")),
        ]);
        let prefetched = Prefetched {
            data: Some(Bytes::from("hello")),
            ..Default::default()
        };
        let mut body =
            CompressionBody::compressed(Box::pin(inner), Level::Default, false, prefetched);
        assert_eq!(body.size_hint().exact(), None);

        let (data, trailers) = drain(&mut body);
        assert!(trailers.is_none());
        assert_eq!(gunzip(&data), b"hello gzip world");
        assert!(body.is_end_stream());
    }

    #[test]
    fn test_compressed_with_trailers() {
        let inner = TestBody::new(vec![
            Frame::data(Bytes::from("hello world")),
            Frame::trailers(checksum_trailers()),
        ]);
        let mut body = CompressionBody::compressed(
            Box::pin(inner),
            Level::Default,
            false,
            Prefetched::default(),
        );

        let (data, trailers) = drain(&mut body);
        assert_eq!(gunzip(&data), b"hello world");
        assert_eq!(trailers.unwrap().get("x-checksum").unwrap(), "abc123");
    }

    #[test]
    fn test_compressed_always_flush_emits_every_chunk() {
        let inner = TestBody::new(vec![
            Frame::data(Bytes::from("event: one\n\n")),
            Frame::data(Bytes::from("event: two\n\n")),
        ]);
        let prefetched = Prefetched::default();
        let mut body = CompressionBody::compressed(Box::pin(inner), Level::Default, true, prefetched);

        // Each chunk produces a frame right away
        for _ in 0..2 {
            let frame = poll_body(&mut body).unwrap().unwrap();
            assert!(!frame.into_data().unwrap().is_empty());
        }
        let (rest, _) = drain(&mut body);
        assert!(!rest.is_empty());
    }

    #[test]
    fn test_compressed_inner_error() {
        let inner = TestBody::failing(vec![Frame::data(Bytes::from("data"))], "broken");
        let mut body = CompressionBody::compressed(
            Box::pin(inner),
            Level::Default,
            false,
            Prefetched::default(),
        );

        let mut saw_error = false;
        while let Some(result) = poll_body(&mut body) {
            if let Err(err) = result {
                assert_eq!(err.to_string(), "response body failed");
                saw_error = true;
            }
        }
        assert!(saw_error);
        assert!(body.is_end_stream());
    }

    #[test]
    fn test_collect_with_body_ext() {
        let inner = TestBody::new(vec![Frame::data(Bytes::from("collected"))]);
        let body = CompressionBody::compressed(
            Box::pin(inner),
            Level::Fastest,
            false,
            Prefetched::default(),
        );
        let mut collect = std::pin::pin!(body.collect());
        let mut cx = Context::from_waker(std::task::Waker::noop());
        let Poll::Ready(Ok(collected)) = collect.as_mut().poll(&mut cx) else {
            panic!("body should collect synchronously");
        };
        assert_eq!(gunzip(&collected.to_bytes()), b"collected");
    }
}
