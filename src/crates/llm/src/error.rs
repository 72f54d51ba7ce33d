//! Error types for LLM calls.

use thiserror::Error;

/// Result type for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur when calling an LLM provider.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API authentication failed.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// API key not found in environment.
    #[error("API key not found: {0}")]
    ApiKeyNotFound(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Request timed out.
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Provider returned a non-success status.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The response did not contain a parseable JSON object of the expected
    /// shape.
    #[error("Response parse error: {0}")]
    Parse(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// Whether a bounded retry may succeed.
    ///
    /// Parse failures count as retryable: the model is sampled again under
    /// the same backoff schedule as transport failures.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Http(_)
                | LlmError::RateLimitExceeded(_)
                | LlmError::Timeout(_)
                | LlmError::Provider(_)
                | LlmError::Parse(_)
        )
    }

    /// Whether this is an authentication problem (never retried).
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            LlmError::Authentication(_) | LlmError::ApiKeyNotFound(_)
        )
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Parse(err.to_string())
    }
}
