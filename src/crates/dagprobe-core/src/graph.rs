//! Core DAG value types.
//!
//! A [`GeneratedDag`] is an immutable value: nodes and edges reference each
//! other by string identifier only, so a full DAG (and every audit trail that
//! contains one) serializes trivially. No parent pointers, no shared state:
//! the node id is the only handle.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Node identifier - unique name for each node within one DAG.
pub type NodeId = String;

/// Difficulty bucket assigned to a generated question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyLevel {
    Easy,
    Medium,
    Hard,
}

impl fmt::Display for DifficultyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DifficultyLevel::Easy => write!(f, "easy"),
            DifficultyLevel::Medium => write!(f, "medium"),
            DifficultyLevel::Hard => write!(f, "hard"),
        }
    }
}

/// A ranked analytical question produced by the question generator.
///
/// Immutable once created; ids are unique within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Unique question identifier within the run.
    pub id: String,
    /// The question text itself.
    pub text: String,
    /// Rank by difficulty, contiguous 1..N within a run.
    pub difficulty_rank: u32,
    /// Difficulty bucket derived from the rank.
    pub difficulty_level: DifficultyLevel,
    /// Why the generator considers the question interesting at this rank.
    pub reasoning: String,
    /// Dataset keys the generator expects an answer to draw on.
    #[serde(default)]
    pub relevant_data_keys: Vec<String>,
}

/// One computation step in a generated DAG.
///
/// `inputs` maps the node function's parameter names to reference
/// expressions (`dataset.<key>` or `prev_node.<node_id>.output`). The map is
/// ordered so serialization is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagNode {
    /// Unique node identifier within the DAG.
    pub node_id: NodeId,
    /// Human-readable description of what the node computes.
    pub operation: String,
    /// Name of the function defined in `code`.
    pub function_name: String,
    /// Parameter name -> reference expression.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    /// Declared output type (informational, checked by the critic).
    pub expected_output_type: String,
    /// Depth of the node; layer N may only read layers < N.
    pub layer: u32,
    /// Source of a single function definition named `function_name`.
    pub code: String,
}

/// A directed edge between two nodes of the same DAG.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DagEdge {
    pub source: NodeId,
    pub target: NodeId,
}

/// A complete DAG proposed by the builder for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedDag {
    /// The question this DAG answers.
    pub question_id: String,
    /// Builder's description of the overall computation.
    #[serde(default)]
    pub description: String,
    /// All nodes, in the order the builder emitted them.
    #[serde(default)]
    pub nodes: Vec<DagNode>,
    /// All edges; both endpoints must name nodes in `nodes`.
    #[serde(default)]
    pub edges: Vec<DagEdge>,
    /// Node whose output is the answer to the question.
    #[serde(default)]
    pub final_answer_node: NodeId,
}

impl GeneratedDag {
    /// An empty DAG for the given question.
    ///
    /// Returned by the builder when every parse/transport retry is exhausted,
    /// so the critic rejects cleanly instead of the loop crashing.
    pub fn empty(question_id: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            description: String::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            final_answer_node: String::new(),
        }
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&DagNode> {
        self.nodes.iter().find(|n| n.node_id == id)
    }

    /// Whether the DAG contains a node with the given id.
    pub fn contains_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }
}

/// Per-layer verdict from the critic's semantic phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerValidation {
    pub layer_index: u32,
    pub nodes_in_layer: Vec<NodeId>,
    pub is_valid: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// Full critic verdict for one build iteration.
///
/// `is_approved` holds iff every layer validation is valid and
/// `specific_errors` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticFeedback {
    pub is_approved: bool,
    pub overall_reasoning: String,
    #[serde(default)]
    pub layer_validations: Vec<LayerValidation>,
    #[serde(default)]
    pub specific_errors: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl CriticFeedback {
    /// A rejection carrying only structural errors (no semantic phase ran).
    pub fn rejected(reasoning: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            is_approved: false,
            overall_reasoning: reasoning.into(),
            layer_validations: Vec::new(),
            specific_errors: errors,
            suggestions: Vec::new(),
        }
    }
}
