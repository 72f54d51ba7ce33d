//! Input reference expressions.
//!
//! Every node input is a string reference resolved at execution time:
//! `dataset.<key>` reads the bundle, `prev_node.<node_id>.output` reads an
//! upstream node's output. Any other shape is a structural error.

use crate::error::{CoreError, Result};
use serde_json::Value;
use std::collections::HashMap;

/// A parsed reference expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputRef {
    /// `dataset.<key>`
    Dataset(String),
    /// `prev_node.<node_id>.output`
    PrevNode(String),
}

impl InputRef {
    /// Parse a reference expression string.
    pub fn parse(expr: &str) -> Result<Self> {
        if let Some(key) = expr.strip_prefix("dataset.") {
            if key.is_empty() {
                return Err(CoreError::MalformedReference(expr.to_string()));
            }
            return Ok(InputRef::Dataset(key.to_string()));
        }
        if let Some(rest) = expr.strip_prefix("prev_node.") {
            if let Some(node_id) = rest.strip_suffix(".output") {
                if node_id.is_empty() || node_id.contains('.') {
                    return Err(CoreError::MalformedReference(expr.to_string()));
                }
                return Ok(InputRef::PrevNode(node_id.to_string()));
            }
        }
        Err(CoreError::MalformedReference(expr.to_string()))
    }
}

/// Resolve a reference expression against the dataset and the outputs
/// computed so far.
pub fn resolve<'a>(
    expr: &str,
    dataset: &'a crate::dataset::Dataset,
    node_outputs: &'a HashMap<String, Value>,
) -> Result<&'a Value> {
    match InputRef::parse(expr)? {
        InputRef::Dataset(key) => dataset
            .get(&key)
            .ok_or(CoreError::DatasetKeyNotFound(key)),
        InputRef::PrevNode(node_id) => node_outputs
            .get(&node_id)
            .ok_or(CoreError::NodeOutputNotFound(node_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use serde_json::json;

    #[test]
    fn test_parse_dataset_ref() {
        assert_eq!(
            InputRef::parse("dataset.total").unwrap(),
            InputRef::Dataset("total".to_string())
        );
    }

    #[test]
    fn test_parse_prev_node_ref() {
        assert_eq!(
            InputRef::parse("prev_node.n1.output").unwrap(),
            InputRef::PrevNode("n1".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        for expr in [
            "dataset.",
            "prev_node.n1",
            "prev_node..output",
            "prev_node.a.b.output",
            "node.n1.output",
            "total",
            "",
        ] {
            assert!(InputRef::parse(expr).is_err(), "accepted {expr:?}");
        }
    }

    #[test]
    fn test_resolve() {
        let dataset: Dataset = serde_json::from_value(json!({"total": 42})).unwrap();
        let mut outputs = HashMap::new();
        outputs.insert("n1".to_string(), json!([1, 2, 3]));

        assert_eq!(
            resolve("dataset.total", &dataset, &outputs).unwrap(),
            &json!(42)
        );
        assert_eq!(
            resolve("prev_node.n1.output", &dataset, &outputs).unwrap(),
            &json!([1, 2, 3])
        );
        assert!(matches!(
            resolve("dataset.missing", &dataset, &outputs),
            Err(CoreError::DatasetKeyNotFound(_))
        ));
        assert!(matches!(
            resolve("prev_node.n2.output", &dataset, &outputs),
            Err(CoreError::NodeOutputNotFound(_))
        ));
    }
}
