use std::io;

/// Boxed error type used for handler and body failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced while compressing a response.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying response sink failed.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The gzip encoder failed to encode, flush or finish.
    #[error("gzip encoder failed")]
    Compress(#[source] io::Error),
    /// The wrapped response body yielded an error.
    #[error("response body failed")]
    Body(#[source] BoxError),
    /// The response was written to after it was closed.
    #[error("response already closed")]
    Closed,
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            other => io::Error::other(other),
        }
    }
}
