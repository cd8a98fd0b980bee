//! AI responder error types.

use thiserror::Error;

/// Errors that can occur during an AI completion.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The HTTP request failed (network, auth, non-2xx status).
    #[error("AI request failed: {0}")]
    RequestFailed(String),

    /// The request exceeded its configured deadline.
    #[error("AI request timed out after {0}ms")]
    Timeout(u64),

    /// No AI backend is configured or reachable.
    #[error("AI responder unavailable: {0}")]
    Unavailable(String),

    /// The response body did not have the expected shape.
    #[error("Failed to parse AI response: {0}")]
    ParseError(String),

    /// Configuration error.
    #[error("AI configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(0)
        } else if err.is_connect() {
            LlmError::Unavailable(err.to_string())
        } else {
            LlmError::RequestFailed(err.to_string())
        }
    }
}
