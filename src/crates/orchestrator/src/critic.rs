//! Two-phase DAG critic.
//!
//! Phase 1 runs the deterministic structural validator suite; a critically
//! broken DAG is rejected immediately with no LLM involved. Phase 2 walks the
//! layers in order and asks the model to judge each one with the full code of
//! that layer and signatures of the already-validated layers above it.
//!
//! A layer whose review call fails after retries is approved rather than
//! penalized; infrastructure trouble is not the model-under-test's fault and
//! sandbox execution remains the final correctness check. Such approvals are
//! marked in the feedback's suggestions.

use crate::prompts;
use dagprobe_core::{
    topology, validate_dag, CriticFeedback, Dataset, GeneratedDag, LayerValidation, Metadata,
    Question,
};
use llm::{ChatRequest, LlmRunner};
use serde::Deserialize;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct LayerReviewPayload {
    is_valid: bool,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default)]
    node_assessments: Vec<NodeAssessmentPayload>,
}

#[derive(Debug, Deserialize)]
struct NodeAssessmentPayload {
    node_id: String,
    #[serde(default = "default_true")]
    is_valid: bool,
    #[serde(default)]
    issues: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// The critic: structural phase then per-layer semantic phase.
#[derive(Clone)]
pub struct Critic {
    runner: LlmRunner,
}

impl Critic {
    pub fn new(runner: LlmRunner) -> Self {
        Self { runner }
    }

    /// Review one DAG and produce the full verdict.
    pub async fn review(
        &self,
        question: &Question,
        dag: &GeneratedDag,
        dataset: &Dataset,
        metadata: &Metadata,
    ) -> CriticFeedback {
        // Phase 1: deterministic structural checks.
        let structural = validate_dag(dag, dataset);
        if structural.critically_broken {
            info!(
                question_id = %question.id,
                errors = structural.errors.len(),
                "DAG critically broken, skipping semantic review"
            );
            return CriticFeedback::rejected(
                format!(
                    "Structural validation found the DAG critically broken: {}",
                    structural.errors.join("; ")
                ),
                structural.errors,
            );
        }

        // Phase 2: layer-by-layer semantic review.
        let mut layer_validations = Vec::new();
        let mut suggestions = Vec::new();
        let layers = topology::extract_layers(dag);
        for (index, layer) in layers.iter().enumerate() {
            let layer_index = layer.first().map(|n| n.layer).unwrap_or(index as u32);
            let upstream: Vec<String> = dag
                .nodes
                .iter()
                .filter(|n| n.layer < layer_index)
                .map(|n| {
                    format!(
                        "- {} (layer {}): fn {}({}) -> {}",
                        n.node_id,
                        n.layer,
                        n.function_name,
                        n.inputs.keys().cloned().collect::<Vec<_>>().join(", "),
                        n.expected_output_type
                    )
                })
                .collect();

            let (system, user) =
                prompts::critic_layer(question, metadata, dag, layer_index, layer, &upstream);
            let request = ChatRequest::new(user).with_system(system).with_temperature(0.0);

            let nodes_in_layer: Vec<String> =
                layer.iter().map(|n| n.node_id.clone()).collect();

            match self
                .runner
                .call_json::<LayerReviewPayload>("critic_layer", &request)
                .await
            {
                Ok(payload) => {
                    let mut issues = payload.issues;
                    let mut all_nodes_valid = true;
                    for assessment in payload.node_assessments {
                        if !assessment.is_valid {
                            all_nodes_valid = false;
                        }
                        for issue in assessment.issues {
                            issues.push(format!("{}: {issue}", assessment.node_id));
                        }
                    }
                    let is_valid = payload.is_valid && all_nodes_valid;
                    debug!(
                        question_id = %question.id,
                        layer = layer_index,
                        is_valid,
                        issues = issues.len(),
                        "layer reviewed"
                    );
                    suggestions.extend(payload.suggestions);
                    layer_validations.push(LayerValidation {
                        layer_index,
                        nodes_in_layer,
                        is_valid,
                        issues,
                    });
                }
                Err(err) => {
                    // Infrastructure failure: approve the layer, mark it.
                    warn!(
                        question_id = %question.id,
                        layer = layer_index,
                        error = %err,
                        "critic unreachable for layer, approving without review"
                    );
                    suggestions.push(format!(
                        "layer {layer_index} approved without semantic review (validator unreachable)"
                    ));
                    layer_validations.push(LayerValidation {
                        layer_index,
                        nodes_in_layer,
                        is_valid: true,
                        issues: Vec::new(),
                    });
                }
            }
        }

        let all_layers_valid = layer_validations.iter().all(|l| l.is_valid);
        let is_approved = all_layers_valid && structural.errors.is_empty();

        let overall_reasoning = if is_approved {
            format!(
                "All {} layers passed structural and semantic review.",
                layer_validations.len()
            )
        } else if !structural.errors.is_empty() {
            format!(
                "Structural validation found {} error(s); see specific_errors.",
                structural.errors.len()
            )
        } else {
            let bad: Vec<String> = layer_validations
                .iter()
                .filter(|l| !l.is_valid)
                .map(|l| l.layer_index.to_string())
                .collect();
            format!("Semantic review rejected layer(s) {}.", bad.join(", "))
        };

        CriticFeedback {
            is_approved,
            overall_reasoning,
            layer_validations,
            specific_errors: structural.errors,
            suggestions,
        }
    }
}
