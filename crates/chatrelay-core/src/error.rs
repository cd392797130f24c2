//! Error types for the relay

use thiserror::Error;

/// Relay error types
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid upstream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Upstream read timed out: {0}")]
    Timeout(String),

    #[error("Upstream read failed: {0}")]
    UpstreamRead(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Downstream write failed: {0}")]
    DownstreamWrite(#[from] SinkError),
}

impl RelayError {
    /// Classify a failure that happened while reading an upstream response body.
    pub fn from_body_error(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::UpstreamRead(err.to_string())
        }
    }
}

/// Failure to turn upstream bytes into text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid UTF-8 sequence at byte offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("stream ended inside a multi-byte character ({pending} bytes pending)")]
    TruncatedCharacter { pending: usize },
}

/// Failure reported by a downstream sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("downstream consumer disconnected")]
    Disconnected,

    #[error("downstream sink already closed")]
    Closed,

    #[error("downstream rejected write: {0}")]
    Rejected(String),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
