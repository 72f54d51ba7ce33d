//! Error types for the dagprobe core.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while validating or executing a DAG.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The dataset bundle is missing a key referenced by a DAG node.
    #[error("Dataset key not found: {0}")]
    DatasetKeyNotFound(String),

    /// A node referenced an upstream output that has not been produced.
    #[error("Node output not found: {0}")]
    NodeOutputNotFound(String),

    /// An input reference expression did not match a recognized shape.
    #[error("Malformed reference expression: {0}")]
    MalformedReference(String),

    /// The DAG failed a structural invariant.
    #[error("Structural error: {0}")]
    Structural(String),

    /// Node code was rejected by the safety scan.
    #[error("Safety violation: {0}")]
    SafetyViolation(String),

    /// Node code failed to parse.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The sandbox raised while calling a node function.
    #[error("Sandbox execution failed: {0}")]
    Execution(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
