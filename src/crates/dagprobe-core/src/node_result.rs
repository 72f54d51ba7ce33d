//! Execution result values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of executing one node in the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionResult {
    pub node_id: String,
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    /// Wall time around the function call only, in milliseconds.
    pub execution_time_ms: f64,
}

impl NodeExecutionResult {
    pub fn success(node_id: impl Into<String>, output: Value, execution_time_ms: f64) -> Self {
        Self {
            node_id: node_id.into(),
            success: true,
            output: Some(output),
            error: None,
            execution_time_ms,
        }
    }

    pub fn failure(
        node_id: impl Into<String>,
        error: impl Into<String>,
        execution_time_ms: f64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            success: false,
            output: None,
            error: Some(error.into()),
            execution_time_ms,
        }
    }
}

/// Outcome of executing one approved DAG over a dataset.
///
/// `node_results` lists exactly the nodes reached before the first failure,
/// in execution order (a prefix of a topological order of the DAG).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub question_id: String,
    pub success: bool,
    pub final_answer: Option<Value>,
    pub node_results: Vec<NodeExecutionResult>,
    pub error: Option<String>,
    /// Wall time across all layers, in milliseconds.
    pub execution_time_ms: f64,
}
