use crate::policy::{Policy, PolicyBuilder, PolicyOption};
use crate::service::CompressionService;
use compression_core::Level;
use std::sync::Arc;
use tower::Layer;

/// A Tower layer that gzips HTTP response bodies.
///
/// This layer wraps services and compresses response bodies when the
/// client's `Accept-Encoding` admits gzip and the response matches the
/// configured policy. The policy is resolved once for every service the
/// layer wraps.
#[derive(Debug, Clone, Default)]
pub struct CompressionLayer {
    options: PolicyBuilder,
}

impl CompressionLayer {
    /// Creates a new compression layer with default settings.
    ///
    /// The default minimum size for compression is 860 bytes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a single policy option.
    pub fn option(mut self, option: PolicyOption) -> Self {
        self.options = self.options.option(option);
        self
    }

    /// Sets the minimum body size required for compression.
    ///
    /// Responses whose body turns out to be smaller than this value are sent
    /// uncompressed. Until that many bytes have been produced, the response
    /// head is held back.
    pub fn min_size(self, size: usize) -> Self {
        self.option(PolicyOption::MinSize(size))
    }

    /// Adds status codes to the eligible set (default: 200).
    pub fn add_status_codes(self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.option(PolicyOption::AddStatusCodes(codes.into_iter().collect()))
    }

    /// Replaces the default eligible status codes.
    pub fn only_status_codes(self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.option(PolicyOption::OnlyStatusCodes(codes.into_iter().collect()))
    }

    /// Adds content types to the eligible set.
    pub fn add_content_types<I, T>(self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let types = types.into_iter().map(Into::into).collect();
        self.option(PolicyOption::AddContentTypes(types))
    }

    /// Replaces the default eligible content types.
    pub fn only_content_types<I, T>(self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let types = types.into_iter().map(Into::into).collect();
        self.option(PolicyOption::OnlyContentTypes(types))
    }

    /// Keeps compressing when the request asks for a byte range.
    pub fn ignore_range(self, ignore: bool) -> Self {
        self.option(PolicyOption::IgnoreRange(ignore))
    }

    /// Sets the gzip effort level.
    pub fn level(self, level: Level) -> Self {
        self.option(PolicyOption::Level(level))
    }

    /// Resolves the configured policy.
    pub fn policy(&self) -> Policy {
        self.options.clone().build()
    }
}

impl From<Policy> for CompressionLayer {
    fn from(policy: Policy) -> Self {
        Self {
            options: PolicyBuilder::from(policy),
        }
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::new(inner, Arc::new(self.policy()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::CompressionBody;
    use bytes::Bytes;
    use flate2::read::GzDecoder;
    use http::{Request, Response, StatusCode, header};
    use http_body_util::{BodyExt, Full};
    use std::convert::Infallible;
    use std::future::Future;
    use std::io::Read;
    use std::pin::pin;
    use std::task::{Context, Poll, Waker};
    use tower::{Service, ServiceExt, service_fn};

    fn block_on<T>(future: impl Future<Output = T>) -> T {
        let mut future = pin!(future);
        let mut cx = Context::from_waker(Waker::noop());
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(output) => output,
            Poll::Pending => panic!("future should resolve synchronously"),
        }
    }

    async fn handler(req: Request<()>) -> Result<Response<Full<Bytes>>, Infallible> {
        let status = match req.uri().path() {
            "/missing" => StatusCode::NOT_FOUND,
            _ => StatusCode::OK,
        };
        let mut response = Response::new(Full::new(Bytes::from("gzip me!")));
        *response.status_mut() = status;
        Ok(response)
    }

    fn call<S>(service: S, path: &str, accept_encoding: &str) -> Response<Bytes>
    where
        S: Service<Request<()>, Response = Response<CompressionBody<Full<Bytes>>>>,
        S::Error: std::fmt::Debug,
    {
        let request = Request::builder()
            .uri(path)
            .header(header::ACCEPT_ENCODING, accept_encoding)
            .body(())
            .unwrap();
        let response = block_on(service.oneshot(request)).unwrap();
        let (parts, body) = response.into_parts();
        let bytes = block_on(body.collect()).unwrap().to_bytes();
        Response::from_parts(parts, bytes)
    }

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_layer_compresses() {
        let service = CompressionLayer::new()
            .min_size(0)
            .layer(service_fn(handler));
        let response = call(service, "/", "gzip, br");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(gunzip(response.body()), b"gzip me!");
    }

    #[test]
    fn test_layer_default_min_size_skips_small_body() {
        let service = CompressionLayer::new().layer(service_fn(handler));
        let response = call(service, "/", "gzip");

        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(response.body(), "gzip me!");
    }

    #[test]
    fn test_layer_without_gzip_support() {
        let service = CompressionLayer::new()
            .min_size(0)
            .layer(service_fn(handler));
        let response = call(service, "/", "br;q=1.0, gzip;q=0");

        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(response.body(), "gzip me!");
    }

    #[test]
    fn test_layer_status_codes() {
        let layer = CompressionLayer::new().min_size(0).only_status_codes([404]);

        let response = call(layer.layer(service_fn(handler)), "/missing", "gzip");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(gunzip(response.body()), b"gzip me!");

        let response = call(layer.layer(service_fn(handler)), "/", "gzip");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), "gzip me!");
    }

    #[test]
    fn test_layer_content_types() {
        let layer = CompressionLayer::new()
            .min_size(0)
            .only_content_types(["application/json"]);
        // Responses without a Content-Type count as text/plain
        let response = call(layer.layer(service_fn(handler)), "/", "gzip");
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());

        let layer = layer.add_content_types(["text/plain"]);
        let response = call(layer.layer(service_fn(handler)), "/", "gzip");
        assert_eq!(response.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");
    }

    #[test]
    fn test_layer_from_policy() {
        let policy = Policy::builder()
            .min_size(1)
            .ignore_range(true)
            .level(Level::Best)
            .build();
        let layer = CompressionLayer::from(policy);
        let service = layer.layer(service_fn(handler));

        assert_eq!(service.policy().min_size(), 1);
        assert!(service.policy().ignore_range());
        assert!(matches!(service.policy().level(), Level::Best));
    }
}
