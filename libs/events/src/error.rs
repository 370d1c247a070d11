//! Error types for event decoding.

use thiserror::Error;

/// Errors that can occur when decoding a queue message.
#[derive(Debug, Error, Clone)]
pub enum EventError {
    /// A required header field is missing.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// The timestamp is not a valid ISO-8601 datetime.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// The payload compression scheme is not supported.
    #[error("unsupported payload compression: {0}")]
    UnsupportedCompression(String),

    /// The event payload is invalid.
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}
