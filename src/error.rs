//! Error taxonomy for the device session.
//!
//! Configuration problems are detected synchronously and never retried;
//! transient connectivity failures are absorbed by the retry path and only
//! surface through status callbacks. The error types here cover the cases a
//! caller can actually observe from the public API.

use thiserror::Error;

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::wire::WireError;

/// Main error type for session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation requires an established session (current state: {state})")]
    NotConnected { state: &'static str },

    #[error("session is shutting down")]
    ShuttingDown,
}

impl SessionError {
    /// Create an invalid-argument error.
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument(message.into())
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
