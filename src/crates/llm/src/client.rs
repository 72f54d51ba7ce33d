//! The `ChatModel` trait and request/response types.
//!
//! Every LLM interaction in the pipeline goes through one `ChatModel` call
//! returning raw text; JSON extraction, parsing and retries live in
//! [`crate::runner::LlmRunner`]. Components treat LLM failure as an outcome,
//! not an exception.

use crate::error::Result;
use async_trait::async_trait;

/// A single chat completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Optional system message.
    pub system: Option<String>,
    /// User prompt.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum completion tokens, provider default when `None`.
    pub max_tokens: Option<usize>,
    /// Ask the provider for a JSON-object response.
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            temperature: 0.0,
            max_tokens: None,
            json_mode: true,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A chat-capable LLM provider.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Perform one completion and return the raw response text.
    async fn complete(&self, request: &ChatRequest) -> Result<String>;

    /// Provider/model name for logging.
    fn name(&self) -> &str;
}
