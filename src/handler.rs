use crate::decision::RequestFacts;
use crate::error::BoxError;
use crate::interceptor::ResponseInterceptor;
use crate::policy::Policy;
use crate::writer::ResponseWriter;
use bytes::Bytes;
use http::Request;
use std::sync::Arc;

/// A handler that writes its response through a [`ResponseWriter`].
pub trait Handler {
    /// Serves one request.
    fn serve(&self, request: &Request<Bytes>, response: &mut dyn ResponseWriter)
    -> Result<(), BoxError>;
}

impl<F> Handler for F
where
    F: Fn(&Request<Bytes>, &mut dyn ResponseWriter) -> Result<(), BoxError>,
{
    fn serve(
        &self,
        request: &Request<Bytes>,
        response: &mut dyn ResponseWriter,
    ) -> Result<(), BoxError> {
        self(request, response)
    }
}

/// Wraps `handler` so its responses are gzipped according to `policy`.
pub fn gzip<H: Handler>(handler: H, policy: Policy) -> GzipHandler<H> {
    GzipHandler::new(handler, policy)
}

/// A [`Handler`] that compresses the responses of the handler it wraps.
#[derive(Debug, Clone)]
pub struct GzipHandler<H> {
    inner: H,
    policy: Arc<Policy>,
}

impl<H> GzipHandler<H> {
    /// Creates a new handler wrapping `inner`.
    pub fn new(inner: H, policy: Policy) -> Self {
        Self {
            inner,
            policy: Arc::new(policy),
        }
    }

    /// Returns a reference to the inner handler.
    pub fn inner(&self) -> &H {
        &self.inner
    }

    /// Returns the resolved policy.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }
}

impl<H: Handler> Handler for GzipHandler<H> {
    fn serve(
        &self,
        request: &Request<Bytes>,
        response: &mut dyn ResponseWriter,
    ) -> Result<(), BoxError> {
        let facts = RequestFacts::from_headers(request.headers());
        let mut interceptor = ResponseInterceptor::new(response, self.policy.clone(), facts);

        let served = self.inner.serve(request, &mut interceptor);
        let closed = interceptor.close();

        served?;
        closed.map_err(|err| {
            tracing::debug!(error = %err, "failed to close compressed response");
            err.into()
        })
    }
}
