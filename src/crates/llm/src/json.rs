//! JSON-object extraction from LLM response text.
//!
//! Providers in JSON mode usually return a bare object, but models still wrap
//! payloads in markdown fences or prose often enough that extraction stays
//! defensive: fenced ```json blocks are preferred, then the outermost brace
//! span.

use crate::error::{LlmError, Result};
use serde::de::DeserializeOwned;

/// Extract the JSON object payload from a response text.
///
/// Looks for ```json ... ``` code blocks first, then falls back to the
/// outermost `{ ... }` span.
pub fn extract_json(text: &str) -> Option<&str> {
    for fence in ["```json", "```JSON"] {
        if let Some(start) = text.find(fence) {
            let content = &text[start + fence.len()..];
            if let Some(end) = content.find("```") {
                return Some(content[..end].trim());
            }
        }
    }

    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            if end > start {
                return Some(text[start..=end].trim());
            }
        }
    }

    None
}

/// Extract and deserialize a JSON object of type `T` from response text.
pub fn parse_json_object<T: DeserializeOwned>(text: &str) -> Result<T> {
    let json_str = extract_json(text)
        .ok_or_else(|| LlmError::Parse("no JSON object found in response".to_string()))?;
    serde_json::from_str(json_str).map_err(|e| {
        let head: String = json_str.chars().take(200).collect();
        LlmError::Parse(format!("{e} (response head: {head})"))
    })
}
