//! Exchange error taxonomy
//!
//! Transient connectivity failures are retried inside the transport and
//! only surface from the first connect attempt. Malformed messages are
//! dropped with a warning. Session invalidation and snapshot failures are
//! returned to the owner.

use std::fmt;
use thiserror::Error;

/// Result type for exchange operations
pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Which part of a user-data initialization failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPart {
    Orders,
    Positions,
    UserChannel,
}

impl fmt::Display for SnapshotPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotPart::Orders => write!(f, "orders snapshot"),
            SnapshotPart::Positions => write!(f, "positions snapshot"),
            SnapshotPart::UserChannel => write!(f, "user channel"),
        }
    }
}

/// Exchange operation errors
#[derive(Error, Debug, Clone)]
pub enum ExchangeError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("HTTP error {0}: {1}")]
    HttpError(u16, String),

    #[error("API error {code}: {message}")]
    ApiError { code: i64, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("{part} failed: {reason}")]
    SnapshotFailed { part: SnapshotPart, reason: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Signing error: {0}")]
    SigningError(String),

    #[error("Fixed point error: {0}")]
    FixedPointError(String),
}

impl ExchangeError {
    /// Wrap an error as the failure of one part of a snapshot/init
    pub fn snapshot(part: SnapshotPart, err: ExchangeError) -> Self {
        match err {
            // Keep the outermost naming if it was already attributed
            already @ ExchangeError::SnapshotFailed { .. } => already,
            other => ExchangeError::SnapshotFailed {
                part,
                reason: other.to_string(),
            },
        }
    }

    /// Session invalidation is fatal for a user channel
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, ExchangeError::SessionExpired(_))
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        ExchangeError::MalformedMessage(msg.into())
    }
}

impl From<omnisync_core::fixed::FixedError> for ExchangeError {
    fn from(err: omnisync_core::fixed::FixedError) -> Self {
        Self::FixedPointError(err.to_string())
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<url::ParseError> for ExchangeError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}
