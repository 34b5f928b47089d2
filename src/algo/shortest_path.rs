//! Weighted shortest paths along outgoing edges.
//!
//! Dijkstra and A* need non-negative weights; on a graph with a negative
//! weight they return `None`, as they do for a missing source or an
//! unreachable target. Bellman-Ford accepts negative weights and reports
//! negative cycles in its result.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use hashbrown::HashMap;
use serde::Serialize;
use tracing::debug;

use crate::model::NodeId;
use crate::storage::GraphSnapshot;
use crate::{Error, Result};

use super::IndexedGraph;

/// A path and its total weight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightedPath {
    pub distance: f64,
    /// Source first, target last.
    pub nodes: Vec<NodeId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BellmanFordResult {
    /// Distances to every reachable node. Meaningless for nodes downstream
    /// of a negative cycle.
    pub distances: HashMap<NodeId, f64>,
    pub has_negative_cycle: bool,
}

/// Min-heap entry ordered by `cost`.
#[derive(Clone, Copy)]
struct State {
    cost: f64,
    node: usize,
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for State {}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        other.cost.total_cmp(&self.cost).then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn has_negative_weight(g: &IndexedGraph) -> bool {
    g.edges().any(|(_, link)| link.weight < 0.0)
}

/// Distance and predecessor arrays from `source`, stopping early once
/// `target` is settled. `heuristic` of zero gives plain Dijkstra.
fn search(
    g: &IndexedGraph,
    source: usize,
    target: Option<usize>,
    heuristic: &dyn Fn(usize) -> f64,
) -> (Vec<f64>, Vec<Option<usize>>) {
    let n = g.len();
    let mut dist = vec![f64::INFINITY; n];
    let mut prev = vec![None; n];
    let mut settled = vec![false; n];
    let mut heap = BinaryHeap::new();
    dist[source] = 0.0;
    heap.push(State { cost: heuristic(source), node: source });

    while let Some(State { node, .. }) = heap.pop() {
        if settled[node] {
            continue;
        }
        settled[node] = true;
        if Some(node) == target {
            break;
        }
        for link in &g.out[node] {
            let candidate = dist[node] + link.weight;
            if candidate < dist[link.node] {
                dist[link.node] = candidate;
                prev[link.node] = Some(node);
                heap.push(State { cost: candidate + heuristic(link.node), node: link.node });
            }
        }
    }
    (dist, prev)
}

fn trace_path(g: &IndexedGraph, prev: &[Option<usize>], target: usize) -> Vec<NodeId> {
    let mut nodes = vec![g.nodes[target]];
    let mut at = target;
    while let Some(p) = prev[at] {
        nodes.push(g.nodes[p]);
        at = p;
    }
    nodes.reverse();
    nodes
}

/// Distances from `source` to every reachable node.
pub fn dijkstra(graph: &GraphSnapshot, source: NodeId, weight: Option<&str>) -> Option<HashMap<NodeId, f64>> {
    let g = IndexedGraph::build(graph, weight);
    let &s = g.index.get(&source)?;
    if has_negative_weight(&g) {
        debug!("dijkstra rejected: negative edge weight");
        return None;
    }
    let (dist, _) = search(&g, s, None, &|_| 0.0);
    Some(
        dist.into_iter()
            .enumerate()
            .filter(|(_, d)| d.is_finite())
            .map(|(i, d)| (g.nodes[i], d))
            .collect(),
    )
}

/// Shortest path from `source` to `target`.
pub fn dijkstra_path(
    graph: &GraphSnapshot,
    source: NodeId,
    target: NodeId,
    weight: Option<&str>,
) -> Option<WeightedPath> {
    astar(graph, source, target, weight, |_| 0.0)
}

/// A* search. `heuristic` must never overestimate the remaining distance
/// to `target`.
pub fn astar(
    graph: &GraphSnapshot,
    source: NodeId,
    target: NodeId,
    weight: Option<&str>,
    heuristic: impl Fn(NodeId) -> f64,
) -> Option<WeightedPath> {
    let g = IndexedGraph::build(graph, weight);
    let (&s, &t) = (g.index.get(&source)?, g.index.get(&target)?);
    if has_negative_weight(&g) {
        debug!("shortest path rejected: negative edge weight");
        return None;
    }
    let h = |i: usize| heuristic(g.nodes[i]);
    let (dist, prev) = search(&g, s, Some(t), &h);
    dist[t].is_finite().then(|| WeightedPath { distance: dist[t], nodes: trace_path(&g, &prev, t) })
}

/// Relaxes all edges `n - 1` times, then checks once more for a cycle.
fn relax_all(g: &IndexedGraph, source: usize) -> (Vec<f64>, Vec<Option<usize>>, bool) {
    let n = g.len();
    let mut dist = vec![f64::INFINITY; n];
    let mut prev = vec![None; n];
    dist[source] = 0.0;
    for _ in 1..n.max(1) {
        let mut changed = false;
        for (u, link) in g.edges() {
            if dist[u].is_finite() && dist[u] + link.weight < dist[link.node] {
                dist[link.node] = dist[u] + link.weight;
                prev[link.node] = Some(u);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    let negative_cycle = g
        .edges()
        .any(|(u, link)| dist[u].is_finite() && dist[u] + link.weight < dist[link.node]);
    (dist, prev, negative_cycle)
}

/// Single-source distances allowing negative weights.
pub fn bellman_ford(graph: &GraphSnapshot, source: NodeId, weight: Option<&str>) -> Option<BellmanFordResult> {
    let g = IndexedGraph::build(graph, weight);
    let &s = g.index.get(&source)?;
    let (dist, _, has_negative_cycle) = relax_all(&g, s);
    let distances = dist
        .into_iter()
        .enumerate()
        .filter(|(_, d)| d.is_finite())
        .map(|(i, d)| (g.nodes[i], d))
        .collect();
    Some(BellmanFordResult { distances, has_negative_cycle })
}

/// Shortest path allowing negative weights; `None` when a negative cycle
/// is reachable from `source`.
pub fn bellman_ford_path(
    graph: &GraphSnapshot,
    source: NodeId,
    target: NodeId,
    weight: Option<&str>,
) -> Option<WeightedPath> {
    let g = IndexedGraph::build(graph, weight);
    let (&s, &t) = (g.index.get(&source)?, g.index.get(&target)?);
    let (dist, prev, negative_cycle) = relax_all(&g, s);
    if negative_cycle || !dist[t].is_finite() {
        return None;
    }
    Some(WeightedPath { distance: dist[t], nodes: trace_path(&g, &prev, t) })
}

/// All-pairs distances from [`floyd_warshall`].
#[derive(Debug, Clone, Serialize)]
pub struct AllPairsDistances {
    nodes: Vec<NodeId>,
    #[serde(skip)]
    index: HashMap<NodeId, usize>,
    /// Row-major `n * n` matrix; infinity when unreachable.
    dist: Vec<f64>,
    pub has_negative_cycle: bool,
}

impl AllPairsDistances {
    /// Distance from `from` to `to`, or `None` if unreachable.
    pub fn distance(&self, from: NodeId, to: NodeId) -> Option<f64> {
        let (&i, &j) = (self.index.get(&from)?, self.index.get(&to)?);
        let d = self.dist[i * self.nodes.len() + j];
        d.is_finite().then_some(d)
    }

    /// Every reachable `(from, to, distance)` triple.
    pub fn pairs(&self) -> impl Iterator<Item = (NodeId, NodeId, f64)> + '_ {
        let n = self.nodes.len();
        self.dist
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_finite())
            .map(move |(k, &d)| (self.nodes[k / n], self.nodes[k % n], d))
    }

    pub fn len(&self) -> usize {
        self.pairs().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// All-pairs shortest paths. O(n³) time and O(n²) memory, so graphs with
/// more than `max_nodes` nodes fail with [`Error::ResourceLimit`].
pub fn floyd_warshall(graph: &GraphSnapshot, weight: Option<&str>, max_nodes: usize) -> Result<AllPairsDistances> {
    let g = IndexedGraph::build(graph, weight);
    let n = g.len();
    if n > max_nodes {
        return Err(Error::ResourceLimit(format!("floyd_warshall on {n} nodes exceeds the limit of {max_nodes}")));
    }
    let mut dist = vec![f64::INFINITY; n * n];
    for i in 0..n {
        dist[i * n + i] = 0.0;
    }
    for (u, link) in g.edges() {
        let cell = &mut dist[u * n + link.node];
        *cell = cell.min(link.weight);
    }
    for k in 0..n {
        for i in 0..n {
            let dik = dist[i * n + k];
            if !dik.is_finite() {
                continue;
            }
            for j in 0..n {
                let through = dik + dist[k * n + j];
                if through < dist[i * n + j] {
                    dist[i * n + j] = through;
                }
            }
        }
    }
    let has_negative_cycle = (0..n).any(|i| dist[i * n + i] < 0.0);
    Ok(AllPairsDistances { nodes: g.nodes, index: g.index, dist, has_negative_cycle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::test_graphs::weighted;

    fn sample() -> (GraphSnapshot, Vec<NodeId>) {
        // 0 -1-> 1 -2-> 3, 0 -5-> 3, 1 -1-> 2 -1-> 3
        weighted(5, &[(0, 1, 1.0), (1, 3, 2.0), (0, 3, 5.0), (1, 2, 1.0), (2, 3, 1.0)])
    }

    #[test]
    fn test_dijkstra_distances_and_path() {
        let (g, n) = sample();
        let dist = dijkstra(&g, n[0], Some("w")).unwrap();
        assert_eq!(dist[&n[3]], 3.0);
        assert!(!dist.contains_key(&n[4]));

        let path = dijkstra_path(&g, n[0], n[3], Some("w")).unwrap();
        assert_eq!(path.distance, 3.0);
        assert_eq!(path.nodes.first(), Some(&n[0]));
        assert_eq!(path.nodes.last(), Some(&n[3]));
        assert!(dijkstra_path(&g, n[0], n[4], Some("w")).is_none());

        // unweighted: fewest hops
        assert_eq!(dijkstra_path(&g, n[0], n[3], None).unwrap().nodes, vec![n[0], n[3]]);
    }

    #[test]
    fn test_negative_weights() {
        let (g, n) = weighted(3, &[(0, 1, 4.0), (0, 2, 1.0), (2, 1, -2.0)]);
        assert!(dijkstra(&g, n[0], Some("w")).is_none());
        assert!(astar(&g, n[0], n[1], Some("w"), |_| 0.0).is_none());
        let bf = bellman_ford_path(&g, n[0], n[1], Some("w")).unwrap();
        assert_eq!(bf.distance, -1.0);
        assert_eq!(bf.nodes, vec![n[0], n[2], n[1]]);
    }

    #[test]
    fn test_bellman_ford_detects_negative_cycle() {
        let (g, n) = weighted(3, &[(0, 1, -1.0), (1, 2, -1.0), (2, 0, -1.0)]);
        let result = bellman_ford(&g, n[0], Some("w")).unwrap();
        assert!(result.has_negative_cycle);
        assert!(bellman_ford_path(&g, n[0], n[2], Some("w")).is_none());
    }

    #[test]
    fn test_floyd_warshall_matches_dijkstra_and_limit() {
        let (g, n) = sample();
        let all = floyd_warshall(&g, Some("w"), 100).unwrap();
        let from_zero = dijkstra(&g, n[0], Some("w")).unwrap();
        for (node, d) in from_zero {
            assert_eq!(all.distance(n[0], node), Some(d));
        }
        assert_eq!(all.distance(n[3], n[0]), None);
        assert!(!all.has_negative_cycle);
        assert!(matches!(floyd_warshall(&g, Some("w"), 2), Err(Error::ResourceLimit(_))));
    }

    #[test]
    fn test_astar_with_admissible_heuristic() {
        let (g, n) = sample();
        let path = astar(&g, n[0], n[3], Some("w"), |node| if node == n[3] { 0.0 } else { 1.0 }).unwrap();
        assert_eq!(path.distance, 3.0);
    }
}
