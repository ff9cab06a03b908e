//! Unified error type.

use std::sync::Arc;

use thiserror::Error as ThisError;

/// The error type returned by rested's fallible operations.
///
/// Route misses (404, 405) are not errors: they are
/// [`Resolution`](crate::Resolution) outcomes answered by the miss handler.
/// This type surfaces everything else: invalid registrations, body loading
/// and parsing failures, misuse of a finalized response, and I/O.
///
/// `Error` is `Clone` so a memoized failure can be handed to every consumer
/// waiting on the same [`BoundedValue`](crate::BoundedValue).
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    #[error("invalid route `{path}`: {reason}")]
    InvalidRoute { path: String, reason: String },

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("failed to read request body: {0}")]
    Body(String),

    #[error("Limit exceeded. Reached {received} bytes. Limit = {limit}")]
    LimitExceeded { received: u64, limit: u64 },

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Unrecognized content type for parsing: {0}")]
    UnsupportedContentType(String),

    /// A write or finalize was attempted after the response was closed.
    #[error("response already closed")]
    ResponseClosed,

    /// Every handle to the request was dropped before the response was finalized.
    #[error("request dropped without a response")]
    ResponseDropped,

    #[error("forward limit of {0} exceeded")]
    ForwardLimit(usize),

    /// The producer behind a bounded value panicked.
    #[error("value loader aborted")]
    LoaderAborted,

    #[error("invalid socket address `{0}`")]
    Addr(String),

    #[error("io: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}
