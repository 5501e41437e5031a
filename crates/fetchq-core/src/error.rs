//! Error types.
//!
//! [`UsageError`] is a contract violation reported synchronously to the
//! caller. [`FetchError`] is a terminal transport outcome delivered through
//! completion handlers; it is cloneable because the same error reaches both
//! the connection's handler and its queue's `did_finish`.

use std::sync::Arc;

use thiserror::Error;

use crate::connection::ConnectionState;

/// Misuse of a connection or queue, returned at the point of the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("connection has no request")]
    MissingRequest,
    #[error("connection is {0:?}, expected Idle")]
    NotIdle(ConnectionState),
    #[error("connection is {0:?}, expected Active")]
    NotActive(ConnectionState),
    #[error("connection already belongs to a queue")]
    AlreadyQueued,
}

/// Why an exchange ended without success.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// libcurl reported an error (connect failure, timeout, TLS, ...).
    #[error("curl: {0}")]
    Curl(#[source] Arc<curl::Error>),
    /// Any other transport-level failure.
    #[error("transport: {0}")]
    Transport(String),
    #[error("stopped after {0} redirects")]
    TooManyRedirects(u32),
    /// A queued connection could not be started when admitted.
    #[error("connection could not be started: {0}")]
    Start(#[source] UsageError),
    #[error("connection cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

impl From<curl::Error> for FetchError {
    fn from(e: curl::Error) -> Self {
        FetchError::Curl(Arc::new(e))
    }
}

impl From<curl::MultiError> for FetchError {
    fn from(e: curl::MultiError) -> Self {
        FetchError::Transport(format!("curl multi: {}", e))
    }
}
