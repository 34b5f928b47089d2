//! Minimum spanning forests (Kruskal, Prim).
//!
//! Edges are treated as undirected. On a disconnected graph the result
//! spans every component. Self-loops never appear in a forest.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use serde::Serialize;
use tracing::debug;

use crate::model::EdgeId;
use crate::storage::GraphSnapshot;

use super::components::UnionFind;
use super::IndexedGraph;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanningForest {
    /// Chosen edges, sorted by id.
    pub edges: Vec<EdgeId>,
    pub total_weight: f64,
}

pub fn kruskal(graph: &GraphSnapshot, weight: Option<&str>) -> SpanningForest {
    let g = IndexedGraph::build(graph, weight);
    let mut candidates: Vec<(usize, usize, EdgeId, f64)> = g
        .edges()
        .filter(|(src, link)| *src != link.node)
        .map(|(src, link)| (src, link.node, link.edge, link.weight))
        .collect();
    candidates.sort_by(|a, b| a.3.total_cmp(&b.3).then(a.2.cmp(&b.2)));

    let mut sets = UnionFind::new(g.len());
    let mut forest = SpanningForest { edges: Vec::new(), total_weight: 0.0 };
    for (a, b, edge, w) in candidates {
        if sets.union(a, b) {
            forest.edges.push(edge);
            forest.total_weight += w;
        }
    }
    forest.edges.sort_unstable();
    debug!(edges = forest.edges.len(), weight = forest.total_weight, "kruskal finished");
    forest
}

struct Candidate {
    weight: f64,
    edge: EdgeId,
    node: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight.total_cmp(&other.weight).then(self.edge.cmp(&other.edge))
    }
}

/// Prim's algorithm, restarted from the lowest unvisited node so it
/// covers every component.
pub fn prim(graph: &GraphSnapshot, weight: Option<&str>) -> SpanningForest {
    let g = IndexedGraph::build(graph, weight);
    let mut in_tree = vec![false; g.len()];
    let mut forest = SpanningForest { edges: Vec::new(), total_weight: 0.0 };

    for root in 0..g.len() {
        if in_tree[root] {
            continue;
        }
        in_tree[root] = true;
        let mut heap: BinaryHeap<Reverse<Candidate>> = g
            .undirected(root)
            .map(|l| Reverse(Candidate { weight: l.weight, edge: l.edge, node: l.node }))
            .collect();
        while let Some(Reverse(next)) = heap.pop() {
            if in_tree[next.node] {
                continue;
            }
            in_tree[next.node] = true;
            forest.edges.push(next.edge);
            forest.total_weight += next.weight;
            for l in g.undirected(next.node) {
                if !in_tree[l.node] {
                    heap.push(Reverse(Candidate { weight: l.weight, edge: l.edge, node: l.node }));
                }
            }
        }
    }
    forest.edges.sort_unstable();
    forest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::test_graphs::weighted;

    #[test]
    fn test_kruskal_and_prim_agree() {
        let (g, _) = weighted(
            5,
            &[(0, 1, 2.0), (0, 3, 6.0), (1, 2, 3.0), (1, 3, 8.0), (1, 4, 5.0), (2, 4, 7.0), (3, 4, 9.0)],
        );
        let k = kruskal(&g, Some("w"));
        let p = prim(&g, Some("w"));
        assert_eq!(k.total_weight, 16.0);
        assert_eq!(k.edges.len(), 4);
        assert_eq!(k.total_weight, p.total_weight);
    }

    #[test]
    fn test_forest_on_disconnected_graph_skips_self_loops() {
        let (g, _) = weighted(4, &[(0, 1, 1.0), (2, 3, 4.0), (2, 2, 0.5)]);
        let k = kruskal(&g, Some("w"));
        let p = prim(&g, Some("w"));
        assert_eq!(k.edges.len(), 2);
        assert_eq!(k.total_weight, 5.0);
        assert_eq!(k, p);
    }
}
