//! DAG builder.
//!
//! One low-temperature LLM call per iteration. Retry iterations carry the
//! previous DAG and the critic feedback with an instruction to emit a
//! complete replacement. When every transport/parse retry is exhausted the
//! builder hands back an empty DAG so the critic rejects it cleanly instead
//! of the loop crashing.

use crate::prompts;
use dagprobe_core::{CriticFeedback, DagEdge, DagNode, Dataset, GeneratedDag, Metadata, Question};
use llm::{ChatRequest, LlmRunner};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct DagPayload {
    #[serde(default)]
    description: String,
    #[serde(default)]
    nodes: Vec<NodePayload>,
    #[serde(default)]
    edges: Vec<EdgePayload>,
    #[serde(default)]
    final_answer_node: String,
}

#[derive(Debug, Deserialize)]
struct NodePayload {
    node_id: String,
    #[serde(default)]
    operation: String,
    function_name: String,
    #[serde(default)]
    inputs: BTreeMap<String, String>,
    #[serde(default)]
    expected_output_type: String,
    #[serde(default)]
    layer: u32,
    code: String,
}

#[derive(Debug, Deserialize)]
struct EdgePayload {
    source: String,
    target: String,
}

/// What one build iteration produced, including the exchange for the
/// conversation log.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub dag: GeneratedDag,
    pub prompt: String,
    /// Raw model response; `None` when the call never succeeded.
    pub response: Option<String>,
}

/// Builds one DAG per iteration for one question.
#[derive(Clone)]
pub struct DagBuilder {
    runner: LlmRunner,
    temperature: f32,
}

impl DagBuilder {
    pub fn new(runner: LlmRunner) -> Self {
        Self {
            runner,
            temperature: 0.2,
        }
    }

    /// Ask the model for a DAG. Never fails: exhaustion degrades to an empty
    /// DAG for the critic to reject.
    pub async fn build(
        &self,
        question: &Question,
        dataset: &Dataset,
        metadata: &Metadata,
        previous: Option<(&GeneratedDag, &CriticFeedback)>,
    ) -> BuildOutcome {
        let (system, user) = prompts::dag_build(question, metadata, dataset, previous);
        let request = ChatRequest::new(user.clone())
            .with_system(system)
            .with_temperature(self.temperature);

        match self
            .runner
            .call_json::<DagPayload>("dag_build", &request)
            .await
        {
            Ok(payload) => {
                let dag = into_dag(payload, &question.id);
                debug!(
                    question_id = %question.id,
                    nodes = dag.nodes.len(),
                    edges = dag.edges.len(),
                    "DAG built"
                );
                let response = serde_json::to_string(&dag).ok();
                BuildOutcome {
                    dag,
                    prompt: user,
                    response,
                }
            }
            Err(err) => {
                warn!(
                    question_id = %question.id,
                    error = %err,
                    "DAG build exhausted retries, returning empty DAG"
                );
                BuildOutcome {
                    dag: GeneratedDag::empty(&question.id),
                    prompt: user,
                    response: None,
                }
            }
        }
    }
}

fn into_dag(payload: DagPayload, question_id: &str) -> GeneratedDag {
    GeneratedDag {
        question_id: question_id.to_string(),
        description: payload.description,
        nodes: payload
            .nodes
            .into_iter()
            .map(|n| DagNode {
                node_id: n.node_id,
                operation: n.operation,
                function_name: n.function_name,
                inputs: n.inputs,
                expected_output_type: n.expected_output_type,
                layer: n.layer,
                code: n.code,
            })
            .collect(),
        edges: payload
            .edges
            .into_iter()
            .map(|e| DagEdge {
                source: e.source,
                target: e.target,
            })
            .collect(),
        final_answer_node: payload.final_answer_node,
    }
}
