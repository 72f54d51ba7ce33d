//! Full-run orchestration.
//!
//! Validates inputs, generates questions, fans out one critic-loop instance
//! per question (bounded concurrency), and collects the commutative
//! accumulators into the final report. Every lifecycle transition lands on
//! the run's event stream.

use crate::builder::DagBuilder;
use crate::critic::Critic;
use crate::critic_loop::{CriticLoop, CriticLoopConfig, QuestionTrace};
use crate::events::{EventKind, EventPublisher};
use crate::questions::{QuestionGenerator, DEFAULT_NUM_QUESTIONS};
use crate::report::RunReport;
use crate::{OrchestratorError, Result};
use dagprobe_core::{DagExecutor, Dataset, DifficultyLevel, Metadata, Question, Sandbox};
use futures::stream::{self, StreamExt};
use llm::LlmRunner;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Difficulty filter applied after question generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyFilter {
    #[default]
    All,
    Easy,
    Medium,
    Hard,
}

impl DifficultyFilter {
    pub fn matches(self, level: DifficultyLevel) -> bool {
        match self {
            DifficultyFilter::All => true,
            DifficultyFilter::Easy => level == DifficultyLevel::Easy,
            DifficultyFilter::Medium => level == DifficultyLevel::Medium,
            DifficultyFilter::Hard => level == DifficultyLevel::Hard,
        }
    }
}

impl std::str::FromStr for DifficultyFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(DifficultyFilter::All),
            "easy" => Ok(DifficultyFilter::Easy),
            "medium" => Ok(DifficultyFilter::Medium),
            "hard" => Ok(DifficultyFilter::Hard),
            other => Err(format!("unknown difficulty filter: {other}")),
        }
    }
}

/// Per-run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub num_questions: usize,
    pub difficulty: DifficultyFilter,
    pub max_iterations: u32,
    /// Cap on concurrently in-flight critic loops (rate-limit hygiene).
    pub max_concurrency: usize,
    pub dataset_name: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_questions: DEFAULT_NUM_QUESTIONS,
            difficulty: DifficultyFilter::All,
            max_iterations: 3,
            max_concurrency: 4,
            dataset_name: "dataset".to_string(),
        }
    }
}

/// Owns the LLM-facing components and drives complete runs.
#[derive(Clone)]
pub struct Orchestrator {
    generator: QuestionGenerator,
    builder: DagBuilder,
    critic: Critic,
    executor: DagExecutor,
}

impl Orchestrator {
    /// Wire all components onto one LLM runner and the default sandbox.
    pub fn new(runner: LlmRunner) -> Self {
        Self {
            generator: QuestionGenerator::new(runner.clone()),
            builder: DagBuilder::new(runner.clone()),
            critic: Critic::new(runner),
            executor: DagExecutor::new(Sandbox::default()),
        }
    }

    pub fn with_executor(mut self, executor: DagExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Execute one full run.
    ///
    /// The returned report is also what gets persisted; the caller owns
    /// writing it to disk. Terminal events are published here.
    pub async fn execute_run(
        &self,
        dataset: Arc<Dataset>,
        metadata: Arc<Metadata>,
        config: &RunConfig,
        publisher: EventPublisher,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunReport> {
        // Ingest gate: no dataset, no run, and no LLM call either.
        if dataset.is_empty() || !dataset.has_content() {
            let message = "dataset is absent or empty".to_string();
            publisher.publish(EventKind::Error, json!({"error": message}));
            return Err(OrchestratorError::Validation(message));
        }

        let mut warnings: Vec<String> = Vec::new();
        if metadata.is_empty() {
            warn!("metadata document missing or empty, continuing with empty schema");
            warnings.push("metadata missing, continuing with empty schema".to_string());
        }

        publisher.publish(
            EventKind::RunStarted,
            json!({
                "dataset_name": config.dataset_name,
                "num_questions": config.num_questions,
                "difficulty": config.difficulty,
                "warnings": warnings,
            }),
        );

        let questions = match self
            .generator
            .generate(&dataset, &metadata, config.num_questions)
            .await
        {
            Ok(questions) => questions,
            Err(err) => {
                publisher.publish(EventKind::Error, json!({"error": err.to_string()}));
                return Err(err);
            }
        };

        let questions: Vec<Question> = questions
            .into_iter()
            .filter(|q| config.difficulty.matches(q.difficulty_level))
            .collect();

        publisher.publish(
            EventKind::QuestionsGenerated,
            json!({
                "count": questions.len(),
                "questions": questions
                    .iter()
                    .map(|q| json!({
                        "id": q.id,
                        "text": q.text,
                        "difficulty_rank": q.difficulty_rank,
                        "difficulty_level": q.difficulty_level,
                    }))
                    .collect::<Vec<_>>(),
            }),
        );

        // Fan-out: one independent critic-loop instance per question, bounded
        // in-flight. Each instance owns its mutable trace; the shared inputs
        // are read-only. Traces are merged at collection time, so the report
        // does not depend on completion order.
        let critic_loop = Arc::new(CriticLoop::new(
            self.builder.clone(),
            self.critic.clone(),
            self.executor.clone(),
            CriticLoopConfig {
                max_iterations: config.max_iterations,
            },
        ));

        let traces: Vec<QuestionTrace> = stream::iter(questions)
            .map(|question| {
                let critic_loop = Arc::clone(&critic_loop);
                let dataset = Arc::clone(&dataset);
                let metadata = Arc::clone(&metadata);
                let publisher = publisher.clone();
                let cancel = cancel.clone();
                async move {
                    critic_loop
                        .run_question(question, &dataset, &metadata, &publisher, &cancel)
                        .await
                }
            })
            .buffer_unordered(config.max_concurrency.max(1))
            .collect()
            .await;

        let report = RunReport::collect(config.dataset_name.clone(), traces);

        if *cancel.borrow() {
            publisher.publish(EventKind::Error, json!({"error": "run cancelled"}));
        } else {
            publisher.publish(
                EventKind::RunComplete,
                json!({
                    "total": report.summary.total,
                    "passed": report.summary.passed,
                    "failed": report.summary.failed,
                    "pass_rate": report.summary.pass_rate,
                    "total_iterations": report.summary.total_iterations,
                }),
            );
        }

        info!(
            total = report.summary.total,
            passed = report.summary.passed,
            pass_rate = report.summary.pass_rate,
            "run complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_difficulty_filter_matches() {
        assert!(DifficultyFilter::All.matches(DifficultyLevel::Hard));
        assert!(DifficultyFilter::Easy.matches(DifficultyLevel::Easy));
        assert!(!DifficultyFilter::Easy.matches(DifficultyLevel::Hard));
    }

    #[test]
    fn test_difficulty_filter_from_str() {
        assert_eq!("all".parse::<DifficultyFilter>().unwrap(), DifficultyFilter::All);
        assert_eq!("HARD".parse::<DifficultyFilter>().unwrap(), DifficultyFilter::Hard);
        assert!("extreme".parse::<DifficultyFilter>().is_err());
    }

    #[test]
    fn test_run_config_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.num_questions, 10);
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.difficulty, DifficultyFilter::All);
    }
}
