//! Provider error types.
//!
//! There is no retry machinery here: provider failures surface
//! immediately and propagate out of the turn.

use thiserror::Error;

/// Error from chat-completion calls.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Non-2xx response from the provider.
    #[error("Provider error (HTTP {status}): {message}")]
    Provider { status: u16, message: String },

    /// Connection failure, timeout, or broken transport.
    #[error("Network error: {0}")]
    Network(String),

    /// The response body could not be interpreted.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The request was cancelled by the caller.
    #[error("Cancelled")]
    Cancelled,
}

impl LlmError {
    /// Classification of this error.
    pub fn kind(&self) -> LlmErrorKind {
        match self {
            LlmError::Provider { status, .. } => classify_http_status(*status),
            LlmError::Network(_) => LlmErrorKind::NetworkError,
            LlmError::Parse(_) => LlmErrorKind::ParseError,
            LlmError::Cancelled => LlmErrorKind::Cancelled,
        }
    }
}

/// Classification of provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Rate limited (429)
    RateLimited,
    /// Server error (500, 502, 503, 504)
    ServerError,
    /// Client error (400, 401, 403, 404)
    ClientError,
    /// Connection failed or timed out
    NetworkError,
    /// Response parsing failure
    ParseError,
    /// Cancelled by the caller
    Cancelled,
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmErrorKind::RateLimited => write!(f, "Rate limited"),
            LlmErrorKind::ServerError => write!(f, "Server error"),
            LlmErrorKind::ClientError => write!(f, "Client error"),
            LlmErrorKind::NetworkError => write!(f, "Network error"),
            LlmErrorKind::ParseError => write!(f, "Parse error"),
            LlmErrorKind::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Parse an HTTP status code into an error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        500 | 502 | 503 | 504 => LlmErrorKind::ServerError,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}
