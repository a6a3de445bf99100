//! Policy-driven gzip compression for HTTP responses.
//!
//! HTTP requires the head of a response to be sent before its body, yet the
//! decision to compress depends on the final status, content type and body
//! size. This crate holds the head back until enough is known, decides once,
//! and then streams the body either gzipped or unchanged.
//!
//! Two front ends share the same [`Policy`] and decision rules:
//!
//! - [`CompressionLayer`], a Tower layer for services returning
//!   `http::Response<B: http_body::Body>`.
//! - [`ResponseInterceptor`] and [`GzipHandler`], for handlers that write
//!   through a [`ResponseWriter`].
//!
//! # Example
//!
//! ```ignore
//! use gzip_response::CompressionLayer;
//! use tower::ServiceBuilder;
//!
//! let service = ServiceBuilder::new()
//!     .layer(CompressionLayer::new().min_size(512).add_status_codes([404]))
//!     .service(my_service);
//! ```
//!
//! # Compression Rules
//!
//! The middleware will **not** compress responses when:
//! - The request's `Accept-Encoding` does not admit `gzip`
//! - The request carries a `Range` header (unless ranges are ignored)
//! - `Content-Type` mentions `gzip`, or `Content-Encoding` / `Content-Range`
//!   is already set
//! - The status code is not eligible (default: `200`)
//! - The `Content-Type` is not eligible; a missing one counts as `text/plain`
//! - The body is smaller than the minimum size (default: 860 bytes)
//!
//! # Response Modifications
//!
//! When compression is applied:
//! - `Content-Encoding: gzip` is set
//! - `Content-Length` header is removed (compressed size is unknown)
//! - `Accept-Ranges` header is removed
//! - `Vary` header includes `Accept-Encoding`
//!
//! The status code is never changed.

#![deny(missing_docs)]

mod body;
mod codec;
mod decision;
mod error;
mod future;
mod handler;
mod interceptor;
mod layer;
mod policy;
mod service;
mod stream;
mod writer;

pub use body::CompressionBody;
pub use codec::{GZIP, accepts_gzip};
pub use compression_core::Level;
pub use decision::{RequestFacts, ResponseFacts, Verdict, decide, finalize_headers};
pub use error::{BoxError, Error};
pub use future::ResponseFuture;
pub use handler::{GzipHandler, Handler, gzip};
pub use interceptor::ResponseInterceptor;
pub use layer::CompressionLayer;
pub use policy::{
    DEFAULT_CONTENT_TYPE, DEFAULT_CONTENT_TYPES, DEFAULT_MIN_SIZE, DEFAULT_STATUS_CODES, Policy,
    PolicyBuilder, PolicyOption,
};
pub use service::CompressionService;
pub use writer::{ResponseRecorder, ResponseWriter};
