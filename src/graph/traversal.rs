//! BFS traversal over a graph's edge list.
//!
//! Edges are walked in both directions: a path question ("how is X linked
//! to Y") does not care which way the claim was phrased.

use std::collections::{HashMap, HashSet, VecDeque};

use super::{Edge, GraphResult};

fn adjacency(edges: &[Edge]) -> HashMap<&str, Vec<&str>> {
    let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        adj.entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
        adj.entry(edge.target.as_str())
            .or_default()
            .push(edge.source.as_str());
    }
    adj
}

/// Shortest unweighted path between two node ids.
///
/// Ties are broken by edge order: the first path discovered wins. Returns
/// the node ids from `from` to `to` inclusive, or `None` when unreachable.
pub fn shortest_path(edges: &[Edge], from: &str, to: &str) -> Option<Vec<String>> {
    if from == to {
        return Some(vec![from.to_string()]);
    }

    let adj = adjacency(edges);
    let mut parent: HashMap<&str, &str> = HashMap::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue = VecDeque::new();

    visited.insert(from);
    queue.push_back(from);

    while let Some(current) = queue.pop_front() {
        for &next in adj.get(current).map(Vec::as_slice).unwrap_or_default() {
            if !visited.insert(next) {
                continue;
            }
            parent.insert(next, current);
            if next == to {
                let mut path = vec![to.to_string()];
                let mut cursor = to;
                while let Some(&prev) = parent.get(cursor) {
                    path.push(prev.to_string());
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }
            queue.push_back(next);
        }
    }

    None
}

/// Node ids reachable from `root` within `max_depth` hops (root included).
pub fn neighborhood(edges: &[Edge], root: &str, max_depth: usize) -> HashSet<String> {
    let adj = adjacency(edges);
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue = VecDeque::new();

    visited.insert(root);
    queue.push_back((root, 0));

    while let Some((node, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for &next in adj.get(node).map(Vec::as_slice).unwrap_or_default() {
            if visited.insert(next) {
                queue.push_back((next, depth + 1));
            }
        }
    }

    visited.into_iter().map(str::to_string).collect()
}

/// Restrict a graph to the nodes within `max_depth` hops of its Core node.
///
/// Edges are kept when both endpoints survive, so the result stays
/// referentially intact. A graph without a Core node is returned unchanged.
pub fn subgraph_within(graph: &GraphResult, max_depth: usize) -> GraphResult {
    let Some(core) = graph.core_node() else {
        return graph.clone();
    };
    let keep = neighborhood(&graph.edges, &core.id, max_depth);

    GraphResult {
        concept: graph.concept.clone(),
        nodes: graph
            .nodes
            .iter()
            .filter(|n| keep.contains(&n.id))
            .cloned()
            .collect(),
        edges: graph
            .edges
            .iter()
            .filter(|e| keep.contains(&e.source) && keep.contains(&e.target))
            .cloned()
            .collect(),
        meta: graph.meta.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CheckerSummary, Domain, Evidence, Meta, Node, Relation};
    use chrono::Utc;

    fn edge(source: &str, target: &str) -> Edge {
        Edge::new(source, target, Relation::RelatedTo, "", Evidence::default(), 0.5)
    }

    // a -> b -> c, a -> d, d -> c, e isolated
    fn edges() -> Vec<Edge> {
        vec![edge("a", "b"), edge("b", "c"), edge("a", "d"), edge("d", "c")]
    }

    #[test]
    fn test_shortest_path_first_found_tie_break() {
        let path = shortest_path(&edges(), "a", "c").unwrap();
        assert_eq!(path, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_shortest_path_ignores_direction() {
        let path = shortest_path(&edges(), "c", "a").unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.first().map(String::as_str), Some("c"));
        assert_eq!(path.last().map(String::as_str), Some("a"));
    }

    #[test]
    fn test_shortest_path_unreachable_and_trivial() {
        assert!(shortest_path(&edges(), "a", "e").is_none());
        assert_eq!(shortest_path(&edges(), "e", "e").unwrap(), vec!["e"]);
    }

    #[test]
    fn test_neighborhood_depth_limit() {
        let one = neighborhood(&edges(), "a", 1);
        assert_eq!(one.len(), 3);
        assert!(one.contains("b") && one.contains("d"));
        assert_eq!(neighborhood(&edges(), "a", 2).len(), 4);
        assert_eq!(neighborhood(&edges(), "a", 0).len(), 1);
    }

    #[test]
    fn test_subgraph_within_keeps_integrity() {
        let core = Node::new("Seed", Domain::core(), 0.9);
        let near = Node::new("Near", Domain::new("Physics"), 0.8);
        let far = Node::new("Far", Domain::new("Physics"), 0.8);
        let graph = GraphResult {
            concept: "Seed".to_string(),
            edges: vec![edge(&core.id, &near.id), edge(&near.id, &far.id)],
            nodes: vec![core, near, far],
            meta: Meta {
                generated_at: Utc::now(),
                version: 1,
                checker_summary: CheckerSummary::default(),
                agent_trace: None,
            },
        };

        let cut = subgraph_within(&graph, 1);
        assert_eq!(cut.nodes.len(), 2);
        assert_eq!(cut.edges.len(), 1);
        assert_eq!(subgraph_within(&graph, 2).nodes.len(), 3);
    }
}
