//! Topology analysis over generated DAGs.
//!
//! Layering, cycle detection and reachability. Used by the executor for
//! ordering and by the critic for scoping semantic review.

use crate::graph::{DagNode, GeneratedDag};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use std::collections::{BTreeMap, HashSet};

/// Group nodes by their declared `layer` field, ascending.
///
/// Layers with no nodes are skipped; within a layer, builder emission order
/// is preserved.
pub fn extract_layers(dag: &GeneratedDag) -> Vec<Vec<&DagNode>> {
    let mut by_layer: BTreeMap<u32, Vec<&DagNode>> = BTreeMap::new();
    for node in &dag.nodes {
        by_layer.entry(node.layer).or_default().push(node);
    }
    by_layer.into_values().collect()
}

/// Whether the edge-induced graph is acyclic, by topological-sort attempt.
///
/// Edges naming unknown nodes are ignored here; endpoint existence is a
/// separate validator.
pub fn is_acyclic(dag: &GeneratedDag) -> bool {
    let graph = edge_graph(dag);
    toposort(&graph, None).is_ok()
}

/// Node ids reachable from `start` by following edges forward.
pub fn descendants<'a>(dag: &'a GeneratedDag, start: &str) -> HashSet<&'a str> {
    walk(dag, start, false)
}

/// Node ids from which `target` is reachable (its ancestors).
pub fn ancestors<'a>(dag: &'a GeneratedDag, target: &str) -> HashSet<&'a str> {
    walk(dag, target, true)
}

fn edge_graph(dag: &GeneratedDag) -> DiGraphMap<&str, ()> {
    let ids: HashSet<&str> = dag.nodes.iter().map(|n| n.node_id.as_str()).collect();
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for id in &ids {
        graph.add_node(id);
    }
    for edge in &dag.edges {
        if ids.contains(edge.source.as_str()) && ids.contains(edge.target.as_str()) {
            graph.add_edge(edge.source.as_str(), edge.target.as_str(), ());
        }
    }
    graph
}

fn walk<'a>(dag: &'a GeneratedDag, from: &str, reverse: bool) -> HashSet<&'a str> {
    let ids: HashSet<&str> = dag.nodes.iter().map(|n| n.node_id.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let Some(&start) = ids.get(from) else {
        return seen;
    };
    let mut stack = vec![start];
    while let Some(current) = stack.pop() {
        for edge in &dag.edges {
            let (src, dst) = (edge.source.as_str(), edge.target.as_str());
            if !ids.contains(src) || !ids.contains(dst) {
                continue;
            }
            let next = if reverse {
                if dst != current {
                    continue;
                }
                src
            } else {
                if src != current {
                    continue;
                }
                dst
            };
            if seen.insert(next) {
                stack.push(next);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DagEdge;
    use std::collections::BTreeMap;

    fn node(id: &str, layer: u32) -> DagNode {
        DagNode {
            node_id: id.to_string(),
            operation: String::new(),
            function_name: format!("f_{id}"),
            inputs: BTreeMap::new(),
            expected_output_type: "any".to_string(),
            layer,
            code: format!("fn f_{id}(x) {{ x }}"),
        }
    }

    fn edge(source: &str, target: &str) -> DagEdge {
        DagEdge {
            source: source.to_string(),
            target: target.to_string(),
        }
    }

    fn diamond() -> GeneratedDag {
        let mut dag = GeneratedDag::empty("q");
        dag.nodes = vec![node("a", 0), node("b", 1), node("c", 1), node("d", 2)];
        dag.edges = vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")];
        dag.final_answer_node = "d".to_string();
        dag
    }

    #[test]
    fn test_extract_layers_ascending() {
        let dag = diamond();
        let layers = extract_layers(&dag);
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0].len(), 1);
        assert_eq!(layers[1].len(), 2);
        assert_eq!(layers[2][0].node_id, "d");
    }

    #[test]
    fn test_extract_layers_skips_gaps() {
        let mut dag = GeneratedDag::empty("q");
        dag.nodes = vec![node("a", 0), node("b", 5)];
        let layers = extract_layers(&dag);
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[1][0].node_id, "b");
    }

    #[test]
    fn test_acyclic_detection() {
        assert!(is_acyclic(&diamond()));

        let mut cyclic = diamond();
        cyclic.edges.push(edge("d", "a"));
        assert!(!is_acyclic(&cyclic));
    }

    #[test]
    fn test_self_loop_is_cyclic() {
        let mut dag = GeneratedDag::empty("q");
        dag.nodes = vec![node("a", 0)];
        dag.edges = vec![edge("a", "a")];
        assert!(!is_acyclic(&dag));
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let dag = diamond();
        let up = ancestors(&dag, "d");
        assert_eq!(up.len(), 3);
        assert!(up.contains("a") && up.contains("b") && up.contains("c"));

        let down = descendants(&dag, "a");
        assert_eq!(down.len(), 3);
        assert!(down.contains("d"));
        assert!(ancestors(&dag, "a").is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Layering partitions the node set, ascending, no empty layers.
            #[test]
            fn prop_extract_layers_partitions_nodes(
                layers in proptest::collection::vec(0u32..5, 1..20)
            ) {
                let mut dag = GeneratedDag::empty("q");
                for (i, layer) in layers.iter().enumerate() {
                    dag.nodes.push(node(&format!("n{i}"), *layer));
                }

                let extracted = extract_layers(&dag);
                let total: usize = extracted.iter().map(|l| l.len()).sum();
                prop_assert_eq!(total, layers.len());

                let mut last: i64 = -1;
                for layer in extracted {
                    prop_assert!(!layer.is_empty());
                    let index = i64::from(layer[0].layer);
                    prop_assert!(index > last);
                    for node in &layer {
                        prop_assert_eq!(i64::from(node.layer), index);
                    }
                    last = index;
                }
            }
        }
    }
}
