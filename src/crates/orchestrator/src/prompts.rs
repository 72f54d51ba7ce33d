//! Prompt assembly for the three LLM-facing components.
//!
//! Behavioral contracts only: each builder states the response JSON shape
//! explicitly and embeds the dataset schema rather than raw rows.

use dagprobe_core::{Dataset, GeneratedDag, Metadata, Question};

/// Shared description of the node code contract embedded in builder and
/// critic prompts.
const NODE_CODE_CONTRACT: &str = r#"Node code rules:
- Each node's `code` is EXACTLY ONE rhai function: `fn <function_name>(<params>) { ... }`.
- Parameter names must match the keys of the node's `inputs` map.
- Each input value is a reference expression: either "dataset.<key>" or "prev_node.<node_id>.output".
- A node at layer N may only reference dataset keys or nodes at layers below N.
- Available builtins: abs, bin, bool, chr, divmod, float, format, hex, int, oct, ord, pow, round, str, repr, hash, dict, list, set, tuple, frozenset, slice, range, len, sorted, reversed, enumerate, zip, map, filter, iter, next, all, any, sum, max, min, isinstance, type, hasattr, getattr, print.
- Available modules (called as module::function): math, statistics, collections, itertools, functools, json, re, datetime, decimal, fractions, random, operator, string.
- Exceptions are raised with `throw ValueError("message")` (also TypeError, KeyError, IndexError, AttributeError, StopIteration, ZeroDivisionError, Exception).
- No imports, no identifiers that start and end with double underscores, no calls to eval/exec/open/compile/globals/locals/vars/dir/delattr/setattr."#;

/// System + user prompt for the question generator.
pub fn question_generation(
    metadata: &Metadata,
    dataset: &Dataset,
    num_questions: usize,
) -> (String, String) {
    let system = "You design analytical evaluation questions over tabular datasets. \
        Respond with a single JSON object."
        .to_string();

    let user = format!(
        r#"Given the dataset described below, produce {num_questions} analytical questions ranked from easiest (rank 1) to hardest (rank {num_questions}).

Guidelines:
- Prefer aggregate and statistical questions (totals, averages, distributions, comparisons between groups, trends over time buckets).
- Never ask to extract or reconstruct personally identifying information; columns flagged PII are off limits as answer content.
- Where possible, reference the pre-aggregated dataset keys listed below instead of raw rows.

Dataset metadata:
{schema}

Dataset structure (keys and value shapes only):
{structure}

Respond with JSON of the shape:
{{"questions": [{{"id": "q1", "text": "...", "difficulty_rank": 1, "reasoning": "why this question and this rank", "relevant_data_keys": ["key1"]}}]}}"#,
        schema = metadata.schema_summary(),
        structure = dataset.structure_summary(),
    );

    (system, user)
}

/// System + user prompt for the DAG builder.
///
/// On a retry iteration the previous DAG and the critic feedback are included
/// with an explicit instruction to produce a complete replacement.
pub fn dag_build(
    question: &Question,
    metadata: &Metadata,
    dataset: &Dataset,
    previous: Option<(&GeneratedDag, &dagprobe_core::CriticFeedback)>,
) -> (String, String) {
    let system = "You design small computation DAGs that answer analytical questions \
        over a dataset. Respond with a single JSON object."
        .to_string();

    let mut user = format!(
        r#"Question ({level}, rank {rank}): {text}

Relevant dataset keys hint: [{keys}]

Dataset schema:
{schema}

Dataset structure:
{structure}

{contract}

Design a DAG of small functions that jointly compute the answer. Respond with JSON of the shape:
{{"description": "...", "nodes": [{{"node_id": "n1", "operation": "what this step does", "function_name": "f1", "inputs": {{"x": "dataset.some_key"}}, "expected_output_type": "float", "layer": 0, "code": "fn f1(x) {{ ... }}"}}], "edges": [{{"source": "n1", "target": "n2"}}], "final_answer_node": "n2"}}

Every node must contribute to the final answer node, every edge must go from a lower layer to a higher layer, and the final answer node must be reachable from layer 0."#,
        level = question.difficulty_level,
        rank = question.difficulty_rank,
        text = question.text,
        keys = question.relevant_data_keys.join(", "),
        schema = metadata.schema_summary(),
        structure = dataset.structure_summary(),
        contract = NODE_CODE_CONTRACT,
    );

    if let Some((dag, feedback)) = previous {
        let dag_json = serde_json::to_string_pretty(dag).unwrap_or_default();
        let feedback_json = serde_json::to_string_pretty(feedback).unwrap_or_default();
        user.push_str(&format!(
            r#"

Your previous attempt was REJECTED. Previous DAG:
{dag_json}

Critic feedback:
{feedback_json}

Produce a COMPLETE REPLACEMENT DAG that fixes every issue above. Do not patch or reference the previous DAG; emit the full new DAG in the same JSON shape."#
        ));
    }

    (system, user)
}

/// System + user prompt for one layer of the critic's semantic phase.
pub fn critic_layer(
    question: &Question,
    metadata: &Metadata,
    dag: &GeneratedDag,
    layer_index: u32,
    layer_nodes: &[&dagprobe_core::DagNode],
    upstream_signatures: &[String],
) -> (String, String) {
    let system = "You are a strict reviewer of computation DAGs. Judge only the layer \
        you are given. Respond with a single JSON object."
        .to_string();

    let overview: Vec<String> = dag
        .nodes
        .iter()
        .map(|n| {
            format!(
                "- {} (layer {}): {} -> {}",
                n.node_id, n.layer, n.operation, n.expected_output_type
            )
        })
        .collect();

    let mut nodes_section = String::new();
    for node in layer_nodes {
        let inputs: Vec<String> = node
            .inputs
            .iter()
            .map(|(k, v)| format!("{k} = {v}"))
            .collect();
        nodes_section.push_str(&format!(
            "node {id} (function {f}, inputs: {inputs}, expected output: {ty}):\n```\n{code}\n```\n",
            id = node.node_id,
            f = node.function_name,
            inputs = inputs.join(", "),
            ty = node.expected_output_type,
            code = node.code,
        ));
    }

    let user = format!(
        r#"Question: {text}

Dataset schema:
{schema}

DAG overview:
{overview}

Already-validated upstream nodes (signatures only):
{upstream}

Review LAYER {layer_index}. For every node in this layer assess:
1. logical correctness given the question,
2. code correctness (will it compute what its operation claims?),
3. type compatibility with upstream inputs and downstream consumers,
4. contribution toward the final answer,
5. edge cases (empty inputs, missing keys, division by zero),
6. field-name correctness: any dict key access not present in the documented schema is a critical error.

Layer {layer_index} nodes:
{nodes_section}

Respond with JSON of the shape:
{{"is_valid": true, "issues": ["critical problems, empty if none"], "suggestions": ["optional improvements"], "node_assessments": [{{"node_id": "n1", "is_valid": true, "issues": []}}]}}"#,
        text = question.text,
        schema = metadata.schema_summary(),
        overview = overview.join("\n"),
        upstream = if upstream_signatures.is_empty() {
            "(none)".to_string()
        } else {
            upstream_signatures.join("\n")
        },
    );

    (system, user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagprobe_core::DifficultyLevel;
    use serde_json::json;

    fn question() -> Question {
        Question {
            id: "q1".to_string(),
            text: "What is the total?".to_string(),
            difficulty_rank: 1,
            difficulty_level: DifficultyLevel::Easy,
            reasoning: String::new(),
            relevant_data_keys: vec!["total".to_string()],
        }
    }

    #[test]
    fn test_question_prompt_mentions_constraints() {
        let dataset = serde_json::from_value(json!({"total": 42})).unwrap();
        let (_, user) = question_generation(&Metadata::default(), &dataset, 10);
        assert!(user.contains("10 analytical questions"));
        assert!(user.contains("PII"));
        assert!(user.contains("pre-aggregated"));
        assert!(user.contains("- total: number"));
    }

    #[test]
    fn test_retry_prompt_demands_replacement() {
        let dataset = serde_json::from_value(json!({"total": 42})).unwrap();
        let dag = GeneratedDag::empty("q1");
        let feedback =
            dagprobe_core::CriticFeedback::rejected("bad", vec!["cycle".to_string()]);
        let (_, first) = dag_build(&question(), &Metadata::default(), &dataset, None);
        let (_, retry) = dag_build(
            &question(),
            &Metadata::default(),
            &dataset,
            Some((&dag, &feedback)),
        );
        assert!(!first.contains("COMPLETE REPLACEMENT"));
        assert!(retry.contains("COMPLETE REPLACEMENT"));
        assert!(retry.contains("cycle"));
    }
}
