use crate::body::{CompressionBody, Prefetched};
use crate::decision::{self, RequestFacts, ResponseFacts, Verdict};
use crate::error::{BoxError, Error};
use crate::policy::Policy;
use bytes::{Buf, BufMut, BytesMut};
use http::response::Parts;
use http::{HeaderMap, Response, header};
use http_body::Body;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

pin_project! {
    /// Future for compression service responses.
    ///
    /// Resolves once the inner response has been decided: the head is held
    /// back while body frames are read ahead, up to the policy's minimum size.
    pub struct ResponseFuture<F, B> {
        #[pin]
        inner: F,
        request: RequestFacts,
        policy: Arc<Policy>,
        pending: Option<Pending<B>>,
    }
}

/// A response whose head is held back until a verdict is reached.
struct Pending<B> {
    parts: Parts,
    body: Pin<Box<B>>,
    buffer: BytesMut,
    prefetched: Prefetched,
}

impl<F, B> ResponseFuture<F, B> {
    pub(crate) fn new(inner: F, request: RequestFacts, policy: Arc<Policy>) -> Self {
        Self {
            inner,
            request,
            policy,
            pending: None,
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
    B: Body,
    B::Data: Buf,
    B::Error: Into<BoxError>,
{
    type Output = Result<Response<CompressionBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        loop {
            let pending = match this.pending {
                Some(pending) => pending,
                None => {
                    let response = match ready!(this.inner.as_mut().poll(cx)) {
                        Ok(response) => response,
                        Err(e) => return Poll::Ready(Err(e)),
                    };
                    let (parts, body) = response.into_parts();
                    this.pending.insert(Pending::new(parts, body))
                }
            };

            let verdict = pending.verdict(this.request, this.policy);
            if verdict.is_decided() {
                let response = match this.pending.take() {
                    Some(pending) => pending.into_response(verdict, this.policy),
                    None => continue,
                };
                return Poll::Ready(Ok(response));
            }

            ready!(pending.poll_read_ahead(cx));
        }
    }
}

impl<B> Pending<B>
where
    B: Body,
    B::Data: Buf,
    B::Error: Into<BoxError>,
{
    fn new(parts: Parts, body: B) -> Self {
        Self {
            parts,
            body: Box::pin(body),
            buffer: BytesMut::new(),
            prefetched: Prefetched::default(),
        }
    }

    fn verdict(&self, request: &RequestFacts, policy: &Policy) -> Verdict {
        // A failing body is never compressed
        if self.prefetched.error.is_some() {
            return Verdict::Passthrough;
        }

        let headers = &self.parts.headers;
        let expected_len = decision::content_length(headers).or_else(|| {
            if self.prefetched.end {
                return None;
            }
            let remaining = self.body.size_hint().exact()?;
            Some(remaining + self.buffer.len() as u64)
        });
        let facts = ResponseFacts {
            status: Some(self.parts.status),
            headers,
            buffered: self.buffer.len(),
            expected_len,
            finished: self.prefetched.end,
        };

        match decision::decide(request, &facts, policy) {
            // Streaming responses can't wait for the minimum size
            Verdict::Undecided if is_streaming(headers) => Verdict::Compress,
            verdict => verdict,
        }
    }

    /// Reads one more frame of the body into the buffer.
    fn poll_read_ahead(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        match ready!(self.body.as_mut().poll_frame(cx)) {
            None => self.prefetched.end = true,
            Some(Ok(frame)) => match frame.into_data() {
                Ok(data) => self.buffer.put(data),
                Err(frame) => {
                    if let Ok(trailers) = frame.into_trailers() {
                        self.prefetched.trailers = Some(trailers);
                        self.prefetched.end = true;
                    }
                }
            },
            Some(Err(e)) => self.prefetched.error = Some(Error::Body(e.into())),
        }
        Poll::Ready(())
    }

    /// Finalizes the head and hands the body to the chosen stream.
    fn into_response(self, verdict: Verdict, policy: &Policy) -> Response<CompressionBody<B>> {
        let Pending {
            mut parts,
            body,
            buffer,
            mut prefetched,
        } = self;

        tracing::debug!(
            status = parts.status.as_u16(),
            ?verdict,
            buffered = buffer.len(),
            "response encoding decided"
        );

        if !buffer.is_empty() {
            prefetched.data = Some(buffer.freeze());
        }
        decision::finalize_headers(&mut parts.headers, verdict);

        let body = if verdict == Verdict::Compress {
            let always_flush = is_streaming(&parts.headers);
            CompressionBody::compressed(body, policy.level(), always_flush, prefetched)
        } else {
            CompressionBody::passthrough(body, prefetched)
        };

        Response::from_parts(parts, body)
    }
}

/// Checks if the response requires flushing every chunk (e.g., streaming).
fn is_streaming(headers: &HeaderMap) -> bool {
    let no_buffering = headers
        .get("x-accel-buffering")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("no"));

    no_buffering
        || headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| {
                let ct = ct.to_ascii_lowercase();
                ct.starts_with("text/event-stream") || ct.starts_with("application/grpc-web")
            })
}
