//! Error types for the client runtime.

use thiserror::Error;

/// Client error type.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend returned a non-success status not covered by another variant.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the backend.
        message: String,
    },

    /// Backend reported that the resource does not exist (404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// A precondition was violated locally or rejected by the backend (400).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A single stream frame could not be decoded. The stream keeps going.
    #[error("Failed to parse server response: {0}")]
    StreamDecode(String),

    /// The stream connection failed. The stream is closed.
    #[error("Stream connection failed: {0}")]
    StreamTransport(String),

    /// Closing a stream handle failed.
    #[error("Failed to close stream: {0}")]
    Close(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Map a non-success HTTP status and response body to an error.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 => Self::Validation(message),
            404 => Self::NotFound(message),
            _ => Self::Api { status, message },
        }
    }

    /// Whether this error ends the stream it was reported on.
    #[must_use]
    pub fn is_stream_fatal(&self) -> bool {
        !matches!(self, Self::StreamDecode(_))
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
