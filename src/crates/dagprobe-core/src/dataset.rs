//! Dataset bundle and schema metadata.
//!
//! A dataset is a mapping from string keys to arbitrary JSON values: a
//! representative row sample plus pre-aggregated summaries. The metadata
//! document describes the columns of the underlying tabular data and each
//! bundle key; both are read-only for the duration of a run.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The pre-aggregated dataset bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    entries: Map<String, Value>,
}

impl Dataset {
    pub fn new(entries: Map<String, Value>) -> Self {
        Self { entries }
    }

    /// Whether the bundle carries at least one non-empty key.
    ///
    /// The orchestrator's ingest gate rejects anything that fails this.
    pub fn has_content(&self) -> bool {
        self.entries.values().any(|v| match v {
            Value::Null => false,
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Structural summary for LLM prompts: top-level keys, their JSON value
    /// types, and example sub-field names. Never raw row dumps.
    pub fn structure_summary(&self) -> String {
        let mut lines = Vec::new();
        for (key, value) in &self.entries {
            lines.push(format!("- {key}: {}", describe_value(value)));
        }
        lines.join("\n")
    }
}

fn describe_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "boolean".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::String(_) => "string".to_string(),
        Value::Array(items) => match items.first() {
            Some(Value::Object(obj)) => {
                let fields: Vec<&str> = obj.keys().take(8).map(String::as_str).collect();
                format!(
                    "array of {} objects with fields [{}]",
                    items.len(),
                    fields.join(", ")
                )
            }
            Some(first) => format!("array of {} {} values", items.len(), type_name(first)),
            None => "empty array".to_string(),
        },
        Value::Object(obj) => {
            let fields: Vec<&str> = obj.keys().take(8).map(String::as_str).collect();
            format!("object with fields [{}]", fields.join(", "))
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Per-column schema description from the metadata document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub column_type: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub strptime: Option<String>,
    #[serde(default)]
    pub nullable: Option<bool>,
    #[serde(default)]
    pub null_rate: Option<f64>,
    /// Sensitivity marker, e.g. `"pii"`.
    #[serde(default)]
    pub sensitivity: Option<String>,
    /// Enumeration of permitted values, where applicable.
    #[serde(default)]
    pub values: Option<Vec<Value>>,
    #[serde(default)]
    pub range: Option<Value>,
    #[serde(default)]
    pub note: Option<String>,
}

impl ColumnMeta {
    pub fn is_pii(&self) -> bool {
        self.sensitivity.as_deref() == Some("pii")
    }
}

/// Schema metadata for one dataset.
///
/// A missing document is non-fatal: the pipeline continues with
/// [`Metadata::default`] and the orchestrator emits a warning event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnMeta>,
    /// Bundle key -> human-readable description.
    #[serde(default)]
    pub dataset_keys: BTreeMap<String, String>,
    #[serde(default)]
    pub important_notes: Vec<String>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.dataset_keys.is_empty()
    }

    /// Rich schema rendering for builder/critic prompts: one block per
    /// column covering type, format, nullability, enumerations, PII flag
    /// and caveats.
    pub fn schema_summary(&self) -> String {
        let mut out = String::new();
        if !self.description.is_empty() {
            out.push_str(&format!("Dataset: {}", self.description));
            if !self.domain.is_empty() {
                out.push_str(&format!(" (domain: {})", self.domain));
            }
            out.push('\n');
        }
        for (name, col) in &self.columns {
            out.push_str(&format!("- column `{name}`"));
            if let Some(ty) = &col.column_type {
                out.push_str(&format!(": {ty}"));
            }
            if let Some(fmt) = &col.format {
                out.push_str(&format!(", format {fmt}"));
            }
            match (col.nullable, col.null_rate) {
                (Some(true), Some(rate)) => {
                    out.push_str(&format!(", nullable (null rate {rate:.2})"));
                }
                (Some(true), None) => out.push_str(", nullable"),
                _ => {}
            }
            if col.is_pii() {
                out.push_str(", PII");
            }
            if let Some(values) = &col.values {
                let rendered: Vec<String> = values.iter().map(Value::to_string).collect();
                out.push_str(&format!(", values: [{}]", rendered.join(", ")));
            }
            if let Some(desc) = &col.description {
                out.push_str(&format!(": {desc}"));
            }
            if let Some(note) = &col.note {
                out.push_str(&format!(" (note: {note})"));
            }
            out.push('\n');
        }
        if !self.dataset_keys.is_empty() {
            out.push_str("Pre-aggregated keys:\n");
            for (key, desc) in &self.dataset_keys {
                out.push_str(&format!("- `{key}`: {desc}\n"));
            }
        }
        if !self.important_notes.is_empty() {
            out.push_str("Important notes:\n");
            for note in &self.important_notes {
                out.push_str(&format!("- {note}\n"));
            }
        }
        out
    }
}
