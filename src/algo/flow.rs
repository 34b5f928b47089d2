//! Network flow: maximum flow (Edmonds-Karp) and min-cost maximum flow
//! (successive shortest paths).
//!
//! Capacities and costs are read from edge properties like any other
//! weight. Edges are directed; parallel edges each carry their own
//! capacity.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::debug;

use crate::model::{EdgeId, NodeId};
use crate::storage::GraphSnapshot;

use super::{IndexedGraph, edge_weight};

const EPS: f64 = 1e-12;

#[derive(Debug, Clone, Serialize)]
pub struct MaxFlow {
    pub max_flow: f64,
    /// Edges carrying positive flow, sorted by id.
    pub flow_edges: Vec<(EdgeId, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MinCostFlow {
    pub max_flow: f64,
    pub total_cost: f64,
    pub flow_edges: Vec<(EdgeId, f64)>,
}

/// Residual network. Arc `2k` is edge `k` forward, arc `2k + 1` its reverse.
struct Residual {
    head: Vec<usize>,
    capacity: Vec<f64>,
    cost: Vec<f64>,
    edge: Vec<EdgeId>,
    adj: Vec<Vec<usize>>,
}

impl Residual {
    fn build(graph: &GraphSnapshot, capacity: Option<&str>, cost: Option<&str>) -> (IndexedGraph, Self) {
        let g = IndexedGraph::build(graph, capacity);
        let mut r = Residual {
            head: Vec::new(),
            capacity: Vec::new(),
            cost: Vec::new(),
            edge: Vec::new(),
            adj: vec![Vec::new(); g.len()],
        };
        for (src, link) in g.edges() {
            let c = if cost.is_some() { edge_weight(graph, link.edge, cost) } else { 0.0 };
            let arc = r.head.len();
            r.head.extend([link.node, src]);
            r.capacity.extend([link.weight.max(0.0), 0.0]);
            r.cost.extend([c, -c]);
            r.edge.extend([link.edge, link.edge]);
            r.adj[src].push(arc);
            r.adj[link.node].push(arc + 1);
        }
        (g, r)
    }

    fn push(&mut self, arc: usize, amount: f64) {
        self.capacity[arc] -= amount;
        self.capacity[arc ^ 1] += amount;
    }

    /// Walks `parent` arcs back from `t`; returns the bottleneck.
    fn bottleneck(&self, parent: &[Option<usize>], s: usize, t: usize) -> f64 {
        let mut amount = f64::INFINITY;
        let mut v = t;
        while v != s {
            let Some(arc) = parent[v] else { return 0.0 };
            amount = amount.min(self.capacity[arc]);
            v = self.head[arc ^ 1];
        }
        amount
    }

    fn augment(&mut self, parent: &[Option<usize>], s: usize, t: usize, amount: f64) {
        let mut v = t;
        while v != s {
            let Some(arc) = parent[v] else { return };
            self.push(arc, amount);
            v = self.head[arc ^ 1];
        }
    }

    /// Flow on each original edge is the capacity gained by its reverse arc.
    fn flows(&self) -> Vec<(EdgeId, f64)> {
        let mut out: Vec<(EdgeId, f64)> = (0..self.head.len())
            .step_by(2)
            .filter(|&arc| self.capacity[arc + 1] > EPS)
            .map(|arc| (self.edge[arc], self.capacity[arc + 1]))
            .collect();
        out.sort_by_key(|(e, _)| *e);
        out
    }
}

/// Maximum flow from `source` to `sink`. `None` if either node is
/// missing. A source equal to the sink carries no flow.
pub fn max_flow(graph: &GraphSnapshot, source: NodeId, sink: NodeId, capacity: Option<&str>) -> Option<MaxFlow> {
    let (g, mut r) = Residual::build(graph, capacity, None);
    let (&s, &t) = (g.index.get(&source)?, g.index.get(&sink)?);
    let mut total = 0.0;
    let mut rounds = 0usize;
    while s != t {
        let mut parent: Vec<Option<usize>> = vec![None; g.len()];
        let mut seen = vec![false; g.len()];
        seen[s] = true;
        let mut queue = VecDeque::from([s]);
        while let Some(v) = queue.pop_front() {
            if v == t {
                break;
            }
            for &arc in &r.adj[v] {
                let w = r.head[arc];
                if !seen[w] && r.capacity[arc] > EPS {
                    seen[w] = true;
                    parent[w] = Some(arc);
                    queue.push_back(w);
                }
            }
        }
        if !seen[t] {
            break;
        }
        let amount = r.bottleneck(&parent, s, t);
        r.augment(&parent, s, t, amount);
        total += amount;
        rounds += 1;
    }
    debug!(augmenting_paths = rounds, flow = total, "max flow finished");
    Some(MaxFlow { max_flow: total, flow_edges: r.flows() })
}

/// Cheapest flow among maximum flows. Augments along shortest-cost paths
/// found with queue-based Bellman-Ford, so negative costs are allowed
/// as long as the network has no negative cycle.
pub fn min_cost_max_flow(
    graph: &GraphSnapshot,
    source: NodeId,
    sink: NodeId,
    capacity: Option<&str>,
    cost: Option<&str>,
) -> Option<MinCostFlow> {
    let (g, mut r) = Residual::build(graph, capacity, cost);
    let (&s, &t) = (g.index.get(&source)?, g.index.get(&sink)?);
    let n = g.len();
    let (mut total_flow, mut total_cost) = (0.0, 0.0);

    while s != t {
        let mut dist = vec![f64::INFINITY; n];
        let mut parent: Vec<Option<usize>> = vec![None; n];
        let mut queued = vec![false; n];
        let mut relaxations = vec![0usize; n];
        dist[s] = 0.0;
        let mut queue = VecDeque::from([s]);
        queued[s] = true;
        let mut negative_cycle = false;
        while let Some(v) = queue.pop_front() {
            queued[v] = false;
            for &arc in &r.adj[v] {
                let w = r.head[arc];
                if r.capacity[arc] > EPS && dist[v] + r.cost[arc] < dist[w] - EPS {
                    dist[w] = dist[v] + r.cost[arc];
                    parent[w] = Some(arc);
                    if !queued[w] {
                        relaxations[w] += 1;
                        if relaxations[w] > n {
                            negative_cycle = true;
                            break;
                        }
                        queued[w] = true;
                        queue.push_back(w);
                    }
                }
            }
            if negative_cycle {
                break;
            }
        }
        if negative_cycle || dist[t].is_infinite() {
            break;
        }
        let amount = r.bottleneck(&parent, s, t);
        if amount <= EPS || amount.is_infinite() {
            break;
        }
        r.augment(&parent, s, t, amount);
        total_flow += amount;
        total_cost += amount * dist[t];
    }
    Some(MinCostFlow { max_flow: total_flow, total_cost, flow_edges: r.flows() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::test_graphs::weighted;
    use crate::model::{props, PropertyMap, Value};
    use crate::tx::{GraphWriter, IdAllocator, WriteSet};

    #[test]
    fn test_max_flow_classic_network() {
        // s=0, t=5
        let (g, n) = weighted(
            6,
            &[
                (0, 1, 16.0),
                (0, 2, 13.0),
                (1, 2, 10.0),
                (2, 1, 4.0),
                (1, 3, 12.0),
                (3, 2, 9.0),
                (2, 4, 14.0),
                (4, 3, 7.0),
                (3, 5, 20.0),
                (4, 5, 4.0),
            ],
        );
        let result = max_flow(&g, n[0], n[5], Some("w")).unwrap();
        assert_eq!(result.max_flow, 23.0);
        let out_of_source: f64 = result
            .flow_edges
            .iter()
            .filter(|(e, _)| g.edge_endpoints(*e).map(|(src, _)| src) == Some(n[0]))
            .map(|(_, f)| f)
            .sum();
        assert_eq!(out_of_source, 23.0);
    }

    #[test]
    fn test_max_flow_unreachable_and_missing() {
        let (g, n) = weighted(3, &[(0, 1, 5.0)]);
        assert_eq!(max_flow(&g, n[0], n[2], Some("w")).unwrap().max_flow, 0.0);
        assert!(max_flow(&g, n[0], NodeId(999), Some("w")).is_none());
    }

    #[test]
    fn test_min_cost_prefers_cheap_route() {
        let mut graph = GraphSnapshot::empty(16);
        let mut log = WriteSet::new();
        let ids = IdAllocator::default();
        let mut w = GraphWriter::new(&mut graph, &mut log, &ids);
        let n: Vec<NodeId> = (0..4).map(|_| w.create_node(&["N"], PropertyMap::new())).collect();
        let arc = |cap: f64, cost: f64| props([("cap", Value::Float(cap)), ("cost", Value::Float(cost))]);
        // two routes 0-1-3 (cost 1 + 1) and 0-2-3 (cost 5 + 5), capacity 2 each
        w.create_edge(n[0], n[1], "T", arc(2.0, 1.0)).unwrap();
        w.create_edge(n[1], n[3], "T", arc(2.0, 1.0)).unwrap();
        w.create_edge(n[0], n[2], "T", arc(2.0, 5.0)).unwrap();
        w.create_edge(n[2], n[3], "T", arc(2.0, 5.0)).unwrap();
        drop(w);

        let result = min_cost_max_flow(&graph, n[0], n[3], Some("cap"), Some("cost")).unwrap();
        assert_eq!(result.max_flow, 4.0);
        assert_eq!(result.total_cost, 2.0 * 2.0 + 2.0 * 10.0);
        assert_eq!(result.flow_edges.len(), 4);
    }
}
