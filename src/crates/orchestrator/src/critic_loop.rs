//! Per-question critic loop.
//!
//! The state machine: BUILD -> VALIDATE -> (BUILD | EXECUTE | GIVE_UP).
//! Approved DAGs are executed once; execution failure is a test outcome and
//! never triggers a rebuild. The loop gives up after `max_iterations`
//! rejections, leaving `execution_result` empty.

use crate::builder::DagBuilder;
use crate::critic::Critic;
use crate::events::{EventKind, EventPublisher};
use dagprobe_core::{
    CriticFeedback, DagExecutor, Dataset, ExecutionResult, GeneratedDag, Metadata, Question,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

/// One role-tagged entry in a question's conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
}

impl ConversationMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Full audit trail for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionTrace {
    pub question: Question,
    pub dag_history: Vec<GeneratedDag>,
    pub feedback_history: Vec<CriticFeedback>,
    /// `None` when the loop gave up before approval.
    pub execution_result: Option<ExecutionResult>,
    pub iterations: u32,
    pub messages: Vec<ConversationMessage>,
}

impl QuestionTrace {
    pub fn new(question: Question) -> Self {
        Self {
            question,
            dag_history: Vec::new(),
            feedback_history: Vec::new(),
            execution_result: None,
            iterations: 0,
            messages: Vec::new(),
        }
    }

    /// Whether this question counts as passed.
    pub fn passed(&self) -> bool {
        self.execution_result
            .as_ref()
            .map(|r| r.success)
            .unwrap_or(false)
    }
}

/// Loop bounds.
#[derive(Debug, Clone)]
pub struct CriticLoopConfig {
    /// Maximum build/critique iterations before giving up.
    pub max_iterations: u32,
}

impl Default for CriticLoopConfig {
    fn default() -> Self {
        Self { max_iterations: 3 }
    }
}

/// Runs the build/critique/execute state machine for single questions.
#[derive(Clone)]
pub struct CriticLoop {
    builder: DagBuilder,
    critic: Critic,
    executor: DagExecutor,
    config: CriticLoopConfig,
}

impl CriticLoop {
    pub fn new(
        builder: DagBuilder,
        critic: Critic,
        executor: DagExecutor,
        config: CriticLoopConfig,
    ) -> Self {
        Self {
            builder,
            critic,
            executor,
            config,
        }
    }

    /// Drive one question to completion and return its full trace.
    pub async fn run_question(
        &self,
        question: Question,
        dataset: &Dataset,
        metadata: &Metadata,
        publisher: &EventPublisher,
        cancel: &watch::Receiver<bool>,
    ) -> QuestionTrace {
        let mut trace = QuestionTrace::new(question);
        let question_id = trace.question.id.clone();

        while trace.iterations < self.config.max_iterations {
            if *cancel.borrow() {
                warn!(question_id = %question_id, "cancelled, giving up");
                break;
            }

            let previous = trace
                .dag_history
                .last()
                .zip(trace.feedback_history.last());
            let outcome = self
                .builder
                .build(&trace.question, dataset, metadata, previous)
                .await;

            trace
                .messages
                .push(ConversationMessage::new("user", outcome.prompt.clone()));
            trace.messages.push(ConversationMessage::new(
                "assistant",
                outcome
                    .response
                    .clone()
                    .unwrap_or_else(|| "(no response: builder retries exhausted)".to_string()),
            ));

            trace.dag_history.push(outcome.dag.clone());
            trace.iterations += 1;
            publisher.publish(
                EventKind::DagBuilt,
                json!({
                    "question_id": question_id,
                    "iteration": trace.iterations,
                    "node_count": outcome.dag.nodes.len(),
                }),
            );

            let feedback = self
                .critic
                .review(&trace.question, &outcome.dag, dataset, metadata)
                .await;
            trace.feedback_history.push(feedback.clone());
            trace.messages.push(ConversationMessage::new(
                "critic",
                feedback.overall_reasoning.clone(),
            ));
            publisher.publish(
                EventKind::CriticResult,
                json!({
                    "question_id": question_id,
                    "iteration": trace.iterations,
                    "is_approved": feedback.is_approved,
                    "error_count": feedback.specific_errors.len(),
                }),
            );

            if feedback.is_approved {
                let result = self.executor.execute(&outcome.dag, dataset);
                publisher.publish(
                    EventKind::ExecutionDone,
                    json!({
                        "question_id": question_id,
                        "success": result.success,
                        "execution_time_ms": result.execution_time_ms,
                    }),
                );
                info!(
                    question_id = %question_id,
                    iterations = trace.iterations,
                    success = result.success,
                    "question executed"
                );
                trace.execution_result = Some(result);
                break;
            }
        }

        if trace.execution_result.is_none() {
            info!(
                question_id = %question_id,
                iterations = trace.iterations,
                "gave up without an approved DAG"
            );
        }

        publisher.publish(
            EventKind::QuestionComplete,
            json!({
                "question_id": question_id,
                "passed": trace.passed(),
                "iterations": trace.iterations,
            }),
        );
        trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagprobe_core::{DifficultyLevel, Sandbox};
    use llm::testing::ScriptedModel;
    use llm::{LlmRunner, RetryConfig};
    use std::sync::Arc;

    fn question() -> Question {
        Question {
            id: "q1".to_string(),
            text: "What is total?".to_string(),
            difficulty_rank: 1,
            difficulty_level: DifficultyLevel::Easy,
            reasoning: String::new(),
            relevant_data_keys: vec!["total".to_string()],
        }
    }

    fn dataset() -> Dataset {
        serde_json::from_value(serde_json::json!({"total": 42})).unwrap()
    }

    fn fast_runner(model: ScriptedModel) -> LlmRunner {
        LlmRunner::new(Arc::new(model))
            .with_retry(RetryConfig::new(0).with_initial_backoff(1).with_jitter(false))
    }

    fn good_dag_response() -> String {
        serde_json::json!({
            "description": "read total",
            "nodes": [{
                "node_id": "n1",
                "operation": "return the total",
                "function_name": "ret",
                "inputs": {"x": "dataset.total"},
                "expected_output_type": "int",
                "layer": 0,
                "code": "fn ret(x) { x }"
            }],
            "edges": [],
            "final_answer_node": "n1"
        })
        .to_string()
    }

    fn approve_response() -> String {
        serde_json::json!({"is_valid": true, "issues": [], "node_assessments": []}).to_string()
    }

    fn loop_with(builder_model: ScriptedModel, critic_model: ScriptedModel) -> CriticLoop {
        CriticLoop::new(
            DagBuilder::new(fast_runner(builder_model)),
            Critic::new(fast_runner(critic_model)),
            DagExecutor::new(Sandbox::default()),
            CriticLoopConfig::default(),
        )
    }

    fn harness() -> (EventPublisher, watch::Sender<bool>, watch::Receiver<bool>) {
        let (publisher, _rx) = EventPublisher::channel("test-run");
        let (tx, cancel) = watch::channel(false);
        (publisher, tx, cancel)
    }

    #[tokio::test]
    async fn test_first_iteration_approval_and_execution() {
        let critic_loop = loop_with(
            ScriptedModel::always(good_dag_response()),
            ScriptedModel::always(approve_response()),
        );
        let (publisher, _cancel_tx, cancel) = harness();
        let trace = critic_loop
            .run_question(question(), &dataset(), &Metadata::default(), &publisher, &cancel)
            .await;

        assert_eq!(trace.iterations, 1);
        assert!(trace.passed());
        let result = trace.execution_result.unwrap();
        assert_eq!(result.final_answer, Some(serde_json::json!(42)));
        assert_eq!(trace.dag_history.len(), 1);
        assert_eq!(trace.feedback_history.len(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_after_max_iterations() {
        // Builder keeps emitting an empty DAG; the critic rejects every time.
        let empty = serde_json::json!({"nodes": [], "edges": [], "final_answer_node": ""});
        let critic_loop = loop_with(
            ScriptedModel::always(empty.to_string()),
            ScriptedModel::new(vec![]),
        );
        let (publisher, _cancel_tx, cancel) = harness();
        let trace = critic_loop
            .run_question(question(), &dataset(), &Metadata::default(), &publisher, &cancel)
            .await;

        assert_eq!(trace.iterations, 3);
        assert!(trace.execution_result.is_none());
        assert_eq!(trace.dag_history.len(), 3);
        assert_eq!(trace.feedback_history.len(), 3);
        assert!(!trace.passed());
    }

    #[tokio::test]
    async fn test_zero_max_iterations_gives_up_immediately() {
        let mut critic_loop = loop_with(
            ScriptedModel::always(good_dag_response()),
            ScriptedModel::always(approve_response()),
        );
        critic_loop.config = CriticLoopConfig { max_iterations: 0 };
        let (publisher, _cancel_tx, cancel) = harness();
        let trace = critic_loop
            .run_question(question(), &dataset(), &Metadata::default(), &publisher, &cancel)
            .await;

        assert_eq!(trace.iterations, 0);
        assert!(trace.execution_result.is_none());
        assert!(trace.dag_history.is_empty());
    }

    #[tokio::test]
    async fn test_iteration_count_matches_history_index() {
        let empty = serde_json::json!({"nodes": [], "edges": [], "final_answer_node": ""});
        let critic_loop = loop_with(
            ScriptedModel::always(empty.to_string()),
            ScriptedModel::new(vec![]),
        );
        let (publisher, _cancel_tx, cancel) = harness();
        let trace = critic_loop
            .run_question(question(), &dataset(), &Metadata::default(), &publisher, &cancel)
            .await;

        // iteration_count at insertion time == history index + 1.
        assert_eq!(trace.dag_history.len() as u32, trace.iterations);
    }

    #[tokio::test]
    async fn test_cancellation_gives_up() {
        let critic_loop = loop_with(
            ScriptedModel::always(good_dag_response()),
            ScriptedModel::always(approve_response()),
        );
        let (publisher, _rx) = EventPublisher::channel("test-run");
        let (_cancel_tx, cancel) = watch::channel(true);
        let trace = critic_loop
            .run_question(question(), &dataset(), &Metadata::default(), &publisher, &cancel)
            .await;

        assert_eq!(trace.iterations, 0);
        assert!(trace.execution_result.is_none());
    }

    #[tokio::test]
    async fn test_execution_failure_is_not_retried() {
        let failing_dag = serde_json::json!({
            "description": "divide by zero",
            "nodes": [{
                "node_id": "n1",
                "operation": "explode",
                "function_name": "f",
                "inputs": {"x": "dataset.total"},
                "expected_output_type": "int",
                "layer": 0,
                "code": "fn f(x) { x / 0 }"
            }],
            "edges": [],
            "final_answer_node": "n1"
        });
        let builder_model = ScriptedModel::always(failing_dag.to_string());
        let critic_loop = loop_with(builder_model, ScriptedModel::always(approve_response()));
        let (publisher, _cancel_tx, cancel) = harness();
        let trace = critic_loop
            .run_question(question(), &dataset(), &Metadata::default(), &publisher, &cancel)
            .await;

        // One iteration only: execution failure never loops back to BUILD.
        assert_eq!(trace.iterations, 1);
        let result = trace.execution_result.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("ZeroDivisionError"));
    }
}
