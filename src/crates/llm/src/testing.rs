//! Scripted stub model for tests.
//!
//! Feeds a fixed queue of responses to the pipeline so loop behavior can be
//! exercised without a provider. Enabled with the `testing` feature.

use crate::client::{ChatModel, ChatRequest};
use crate::error::{LlmError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

/// A [`ChatModel`] that replays a scripted queue of outcomes.
///
/// When the queue runs dry it keeps returning the configured fallback (by
/// default a provider error), so exhaustion scenarios are easy to stage.
pub struct ScriptedModel {
    queue: Mutex<Vec<Result<String>>>,
    fallback: Option<String>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<String>>) -> Self {
        Self {
            queue: Mutex::new(responses),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Respond with the same text for every call.
    pub fn always(text: impl Into<String>) -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
            fallback: Some(text.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// After the queue drains, keep returning this text instead of erroring.
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    /// Requests observed so far (prompt capture for assertions).
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        self.requests.lock().push(request.clone());
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            match &self.fallback {
                Some(text) => Ok(text.clone()),
                None => Err(LlmError::Provider("scripted queue exhausted".to_string())),
            }
        } else {
            queue.remove(0)
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
