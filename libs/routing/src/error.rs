//! Error types for the key/value store and route registration.

use thiserror::Error;

/// Errors returned by a [`crate::KvStore`].
#[derive(Debug, Error)]
pub enum KvError {
    /// The key (or every key under a prefix) does not exist.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The store could not be reached.
    #[error("kv transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with an unexpected status.
    #[error("kv store returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The store answered with a payload we could not decode.
    #[error("invalid kv payload: {0}")]
    Decode(String),

    /// A write was refused by the test double.
    #[error("kv write rejected: {0}")]
    Rejected(String),
}

impl KvError {
    /// Returns true if the error means the key is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, KvError::NotFound(_))
    }
}

/// Errors returned by [`crate::RoutingRegistrar`].
#[derive(Debug, Error)]
pub enum RoutingError {
    /// Frontend, backend, server and option names must be non-empty and
    /// must not contain `/`.
    #[error("invalid routing name: {0:?}")]
    InvalidName(String),

    /// The underlying store failed.
    #[error(transparent)]
    Kv(#[from] KvError),
}
