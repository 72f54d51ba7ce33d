//! Run orchestration for dagprobe.
//!
//! Elicits ranked questions from an LLM, runs one critic loop per question
//! (build -> structural + semantic critique -> execute), and aggregates the
//! per-question traces into a report. Lifecycle transitions are mirrored onto
//! a per-run event stream consumed over SSE.

pub mod api;
pub mod builder;
pub mod critic;
pub mod critic_loop;
pub mod events;
pub mod prompts;
pub mod questions;
pub mod registry;
pub mod report;
pub mod run;

use thiserror::Error;

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Bad inputs; fatal before any LLM call.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The LLM provider could not be reached or would not answer.
    #[error("LLM unavailable: {0}")]
    Llm(#[from] llm::LlmError),

    /// Run id is unknown to the registry.
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Filesystem error reading inputs or writing results.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invariant violation in the core.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

pub use builder::DagBuilder;
pub use critic::Critic;
pub use critic_loop::{ConversationMessage, CriticLoop, CriticLoopConfig, QuestionTrace};
pub use events::{EventKind, EventPublisher, RunEvent};
pub use questions::QuestionGenerator;
pub use registry::{RunHandle, RunRegistry};
pub use report::{DifficultyStats, RunReport, RunSummary};
pub use run::{DifficultyFilter, Orchestrator, RunConfig};
