//! Structural validation of generated DAGs.
//!
//! Deterministic checks, no LLM involved. Each validator returns a (possibly
//! empty) list of error strings; the critic concatenates them. A DAG is
//! *critically broken*, short-circuiting past semantic review, if the node
//! list is empty, the graph is cyclic, the final answer node is missing, or
//! any node's code fails to parse.

use crate::dataset::Dataset;
use crate::graph::GeneratedDag;
use crate::reference::InputRef;
use crate::safety;
use crate::topology;
use std::collections::{HashMap, HashSet};

/// Outcome of the full structural suite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuralReport {
    /// All collected error strings, in validator order.
    pub errors: Vec<String>,
    /// Whether semantic validation should be skipped entirely.
    pub critically_broken: bool,
}

impl StructuralReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run the complete validator suite over one DAG.
pub fn validate_dag(dag: &GeneratedDag, dataset: &Dataset) -> StructuralReport {
    let mut report = StructuralReport::default();

    if dag.nodes.is_empty() {
        report.errors.push("DAG has no nodes".to_string());
        report.critically_broken = true;
        return report;
    }

    report.errors.extend(check_unique_ids(dag));
    report.errors.extend(check_edge_endpoints(dag));
    report.errors.extend(check_layer_monotonicity(dag));

    let cycle_errors = check_acyclicity(dag);
    let cyclic = !cycle_errors.is_empty();
    report.errors.extend(cycle_errors);

    let connectivity_errors = check_connectivity(dag);
    let missing_final = dag.final_answer_node.is_empty()
        || !dag.contains_node(&dag.final_answer_node);
    report.errors.extend(connectivity_errors);

    report.errors.extend(check_input_references(dag, dataset));

    let (code_errors, any_parse_failure) = check_node_code(dag);
    report.errors.extend(code_errors);

    report.critically_broken = cyclic || missing_final || any_parse_failure;
    report
}

/// Invariant 1: node ids unique within the DAG.
pub fn check_unique_ids(dag: &GeneratedDag) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut errors = Vec::new();
    for node in &dag.nodes {
        if !seen.insert(node.node_id.as_str()) {
            errors.push(format!("Duplicate node id: {}", node.node_id));
        }
    }
    errors
}

/// Invariant 2: every edge endpoint names an existing node.
pub fn check_edge_endpoints(dag: &GeneratedDag) -> Vec<String> {
    let ids: HashSet<&str> = dag.nodes.iter().map(|n| n.node_id.as_str()).collect();
    let mut errors = Vec::new();
    for edge in &dag.edges {
        if !ids.contains(edge.source.as_str()) {
            errors.push(format!("Edge source {} does not exist", edge.source));
        }
        if !ids.contains(edge.target.as_str()) {
            errors.push(format!("Edge target {} does not exist", edge.target));
        }
    }
    errors
}

/// Invariant 3: for every edge `u -> v`, `u.layer < v.layer`.
pub fn check_layer_monotonicity(dag: &GeneratedDag) -> Vec<String> {
    let layers: HashMap<&str, u32> = dag
        .nodes
        .iter()
        .map(|n| (n.node_id.as_str(), n.layer))
        .collect();
    let mut errors = Vec::new();
    for edge in &dag.edges {
        if let (Some(&src), Some(&dst)) = (
            layers.get(edge.source.as_str()),
            layers.get(edge.target.as_str()),
        ) {
            if src >= dst {
                errors.push(format!(
                    "Edge {} -> {} violates layer ordering ({} >= {})",
                    edge.source, edge.target, src, dst
                ));
            }
        }
    }
    errors
}

/// Invariant 4: the induced graph is acyclic.
pub fn check_acyclicity(dag: &GeneratedDag) -> Vec<String> {
    if topology::is_acyclic(dag) {
        Vec::new()
    } else {
        vec!["Cycle detected in DAG edges".to_string()]
    }
}

/// Invariant 5: the final answer node exists, is reachable from layer 0, and
/// every node is one of its ancestors (no dead nodes).
pub fn check_connectivity(dag: &GeneratedDag) -> Vec<String> {
    let mut errors = Vec::new();
    let final_id = dag.final_answer_node.as_str();

    if final_id.is_empty() {
        errors.push("Missing final_answer_node".to_string());
        return errors;
    }
    let Some(final_node) = dag.node(final_id) else {
        errors.push(format!("final_answer_node {final_id} does not exist"));
        return errors;
    };

    let up = topology::ancestors(dag, final_id);
    let reachable_from_layer_zero = final_node.layer == 0
        || dag
            .nodes
            .iter()
            .any(|n| n.layer == 0 && up.contains(n.node_id.as_str()));
    if !reachable_from_layer_zero {
        errors.push(format!(
            "final_answer_node {final_id} is not reachable from any layer-0 node"
        ));
    }

    for node in &dag.nodes {
        let id = node.node_id.as_str();
        if id != final_id && !up.contains(id) {
            errors.push(format!(
                "Node {id} does not contribute to final_answer_node {final_id}"
            ));
        }
    }
    errors
}

/// Invariant 6: every input reference is well-formed and resolvable.
pub fn check_input_references(dag: &GeneratedDag, dataset: &Dataset) -> Vec<String> {
    let layers: HashMap<&str, u32> = dag
        .nodes
        .iter()
        .map(|n| (n.node_id.as_str(), n.layer))
        .collect();
    let mut errors = Vec::new();
    for node in &dag.nodes {
        for (param, expr) in &node.inputs {
            match InputRef::parse(expr) {
                Ok(InputRef::Dataset(key)) => {
                    if !dataset.contains_key(&key) {
                        errors.push(format!(
                            "Node {} input {param}: dataset key {key} does not exist",
                            node.node_id
                        ));
                    }
                }
                Ok(InputRef::PrevNode(source)) => match layers.get(source.as_str()) {
                    None => errors.push(format!(
                        "Node {} input {param}: references unknown node {source}",
                        node.node_id
                    )),
                    Some(&source_layer) if source_layer >= node.layer => {
                        errors.push(format!(
                            "Node {} input {param}: references node {source} at layer {} (not below {})",
                            node.node_id, source_layer, node.layer
                        ));
                    }
                    Some(_) => {}
                },
                Err(_) => errors.push(format!(
                    "Node {} input {param}: malformed reference expression {expr:?}",
                    node.node_id
                )),
            }
        }
    }
    errors
}

/// Invariants 7 and 8: code parses as one matching function definition and
/// passes the safety scan. The boolean is true when any node failed to parse.
pub fn check_node_code(dag: &GeneratedDag) -> (Vec<String>, bool) {
    let mut errors = Vec::new();
    let mut any_parse_failure = false;
    for node in &dag.nodes {
        let report = safety::scan_node_code(&node.code, &node.function_name);
        if !report.parse_errors.is_empty() {
            any_parse_failure = true;
        }
        for err in report.parse_errors.iter().chain(report.violations.iter()) {
            errors.push(format!("Node {}: {err}", node.node_id));
        }
    }
    (errors, any_parse_failure)
}
