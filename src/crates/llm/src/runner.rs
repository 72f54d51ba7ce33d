//! The single entry point for effectful LLM calls.
//!
//! `(request, expected shape) -> parsed value | transport error | parse
//! error`. Retries live here and nowhere else; callers decide their own
//! fallback when the runner finally gives up.

use crate::client::{ChatModel, ChatRequest};
use crate::error::Result;
use crate::json::parse_json_object;
use crate::retry::{retry_with_backoff, RetryConfig};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

/// Wraps a [`ChatModel`] with the retry policy and JSON parsing.
#[derive(Clone)]
pub struct LlmRunner {
    model: Arc<dyn ChatModel>,
    retry: RetryConfig,
}

impl LlmRunner {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Provider/model name for logging.
    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// One complete JSON-typed LLM call. A response that fails to parse is
    /// retried under the same bounded schedule as a transport failure.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: &ChatRequest,
    ) -> Result<T> {
        retry_with_backoff(&self.retry, operation, || async {
            let text = self.model.complete(request).await?;
            debug!(
                operation,
                model = self.model.name(),
                response_chars = text.len(),
                "LLM responded"
            );
            parse_json_object::<T>(&text)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        value: i64,
    }

    struct QueueModel {
        responses: Mutex<Vec<Result<String>>>,
    }

    #[async_trait]
    impl ChatModel for QueueModel {
        async fn complete(&self, _request: &ChatRequest) -> Result<String> {
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Err(LlmError::Provider("queue exhausted".to_string()))
            } else {
                responses.remove(0)
            }
        }

        fn name(&self) -> &str {
            "queue"
        }
    }

    fn runner(responses: Vec<Result<String>>) -> LlmRunner {
        LlmRunner::new(Arc::new(QueueModel {
            responses: Mutex::new(responses),
        }))
        .with_retry(RetryConfig::new(2).with_initial_backoff(1).with_jitter(false))
    }

    #[tokio::test]
    async fn test_parses_clean_json() {
        let r = runner(vec![Ok("{\"value\": 5}".to_string())]);
        let parsed: Answer = r.call_json("op", &ChatRequest::new("p")).await.unwrap();
        assert_eq!(parsed, Answer { value: 5 });
    }

    #[tokio::test]
    async fn test_retries_bad_json_then_succeeds() {
        let r = runner(vec![
            Ok("not json at all".to_string()),
            Ok("```json\n{\"value\": 9}\n```".to_string()),
        ]);
        let parsed: Answer = r.call_json("op", &ChatRequest::new("p")).await.unwrap();
        assert_eq!(parsed.value, 9);
    }

    #[tokio::test]
    async fn test_gives_up_after_retry_budget() {
        let r = runner(vec![
            Err(LlmError::Timeout("t1".to_string())),
            Err(LlmError::Timeout("t2".to_string())),
            Err(LlmError::Timeout("t3".to_string())),
        ]);
        let result: Result<Answer> = r.call_json("op", &ChatRequest::new("p")).await;
        assert!(result.is_err());
    }
}
