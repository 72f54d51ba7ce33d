//! Layer-ordered evaluation of a validated DAG.
//!
//! Nodes within a layer are independent; they are executed in builder
//! emission order, so the per-node result list is always a prefix of a
//! topological order. Execution stops at the first failing node and the
//! prior outputs are retained for the trace.

use crate::dataset::Dataset;
use crate::graph::GeneratedDag;
use crate::node_result::{ExecutionResult, NodeExecutionResult};
use crate::reference;
use crate::sandbox::Sandbox;
use crate::topology;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Executes validated DAGs over a dataset.
#[derive(Debug, Clone, Default)]
pub struct DagExecutor {
    sandbox: Sandbox,
}

impl DagExecutor {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }

    /// Run the whole DAG. The result is a value either way: node failures are
    /// test outcomes, not errors of the executor itself.
    pub fn execute(&self, dag: &GeneratedDag, dataset: &Dataset) -> ExecutionResult {
        let started = Instant::now();
        let mut node_outputs: HashMap<String, Value> = HashMap::new();
        let mut node_results: Vec<NodeExecutionResult> = Vec::new();

        debug!(
            question_id = %dag.question_id,
            nodes = dag.nodes.len(),
            "starting DAG execution"
        );

        for layer in topology::extract_layers(dag) {
            for node in layer {
                let mut resolved: BTreeMap<String, Value> = BTreeMap::new();
                let mut resolve_error: Option<String> = None;
                for (param, expr) in &node.inputs {
                    match reference::resolve(expr, dataset, &node_outputs) {
                        Ok(value) => {
                            resolved.insert(param.clone(), value.clone());
                        }
                        Err(err) => {
                            resolve_error = Some(format!("input {param}: {err}"));
                            break;
                        }
                    }
                }

                let result = match resolve_error {
                    Some(message) => NodeExecutionResult::failure(&node.node_id, message, 0.0),
                    None => self.sandbox.execute_node(node, &resolved),
                };

                let failed = !result.success;
                let error = result.error.clone();
                if let Some(output) = &result.output {
                    node_outputs.insert(node.node_id.clone(), output.clone());
                }
                node_results.push(result);

                if failed {
                    let message = error.unwrap_or_else(|| "node failed".to_string());
                    warn!(
                        question_id = %dag.question_id,
                        node_id = %node.node_id,
                        error = %message,
                        "DAG execution failed"
                    );
                    return ExecutionResult {
                        question_id: dag.question_id.clone(),
                        success: false,
                        final_answer: None,
                        node_results,
                        error: Some(format!("node {}: {message}", node.node_id)),
                        execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                    };
                }
            }
        }

        let final_answer = node_outputs.get(&dag.final_answer_node).cloned();
        let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        match final_answer {
            Some(answer) => {
                info!(
                    question_id = %dag.question_id,
                    execution_time_ms,
                    "DAG execution completed"
                );
                ExecutionResult {
                    question_id: dag.question_id.clone(),
                    success: true,
                    final_answer: Some(answer),
                    node_results,
                    error: None,
                    execution_time_ms,
                }
            }
            None => ExecutionResult {
                question_id: dag.question_id.clone(),
                success: false,
                final_answer: None,
                node_results,
                error: Some(format!(
                    "final answer node {} produced no output",
                    dag.final_answer_node
                )),
                execution_time_ms,
            },
        }
    }
}
