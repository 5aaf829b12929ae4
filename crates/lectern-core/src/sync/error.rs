//! Remote backend error taxonomy.

use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported by a remote backend adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Connection could not be established or was lost.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The remote record does not exist.
    #[error("remote record not found: {0}")]
    NotFound(String),

    /// The backend rejected the payload.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Credentials were missing or rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The backend failed to process the request.
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP-style status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// The backend answered with something we could not read.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl BackendError {
    /// Returns true if the request may succeed when repeated.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout | Self::Server { .. })
    }

    /// Short machine-readable kind, used in reports.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout => "timeout",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::Unauthorized(_) => "unauthorized",
            Self::Server { .. } => "server",
            Self::InvalidPayload(_) => "invalid_payload",
        }
    }
}
