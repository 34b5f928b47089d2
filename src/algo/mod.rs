//! # Graph Algorithms
//!
//! Pure functions over one [`GraphSnapshot`], usually a transaction's
//! [`view`](crate::tx::Transaction::view). Nothing here mutates the graph.
//!
//! Weighted algorithms read the weight of an edge from a named property.
//! An absent or non-numeric weight counts as `1.0`, and passing `None` as
//! the property name makes every edge weigh `1.0`.
//!
//! | Module | Algorithms |
//! |--------|------------|
//! | `traversal` | BFS, DFS, BFS layers |
//! | `components` | connected, strongly connected, DAG check, topological sort |
//! | `shortest_path` | Dijkstra, A*, Bellman-Ford, Floyd-Warshall |
//! | `centrality` | degree, PageRank, betweenness, closeness |
//! | `community` | label propagation, Louvain |
//! | `mst` | Kruskal, Prim |
//! | `flow` | max flow, min-cost max flow |
//! | `structure` | articulation points, bridges, k-core |

pub mod centrality;
pub mod community;
pub mod components;
pub mod flow;
pub mod mst;
pub mod shortest_path;
pub mod structure;
pub mod traversal;

use hashbrown::HashMap;

use crate::model::{Direction, EdgeId, NodeId};
use crate::storage::GraphSnapshot;

pub use centrality::{
    betweenness_centrality, closeness_centrality, degree_centrality, degree_centrality_normalized, pagerank,
    DegreeCentrality,
};
pub use community::{label_propagation, louvain, LouvainResult};
pub use components::{
    connected_component_count, connected_components, is_dag, strongly_connected_components, topological_sort,
};
pub use flow::{max_flow, min_cost_max_flow, MaxFlow, MinCostFlow};
pub use mst::{kruskal, prim, SpanningForest};
pub use shortest_path::{
    astar, bellman_ford, bellman_ford_path, dijkstra, dijkstra_path, floyd_warshall, AllPairsDistances,
    BellmanFordResult, WeightedPath,
};
pub use structure::{articulation_points, bridges, k_core, kcore, KCoreResult};
pub use traversal::{bfs, bfs_all, bfs_layers, dfs, dfs_all};

/// Weight of `edge` under `key`; absent or non-numeric is `1.0`.
pub fn edge_weight(graph: &GraphSnapshot, edge: EdgeId, key: Option<&str>) -> f64 {
    key.and_then(|k| graph.edge_property(edge, k))
        .and_then(|v| v.as_float())
        .unwrap_or(1.0)
}

/// One adjacency entry of an [`IndexedGraph`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Link {
    pub edge: EdgeId,
    /// Index of the node at the other end.
    pub node: usize,
    pub weight: f64,
}

/// Dense, index-addressed copy of a snapshot's topology.
///
/// Nodes are indexed in ascending id order so every algorithm built on it
/// is deterministic.
pub(crate) struct IndexedGraph {
    pub nodes: Vec<NodeId>,
    pub index: HashMap<NodeId, usize>,
    pub out: Vec<Vec<Link>>,
    pub inc: Vec<Vec<Link>>,
}

impl IndexedGraph {
    pub fn build(graph: &GraphSnapshot, weight: Option<&str>) -> Self {
        let nodes = graph.node_ids();
        let index: HashMap<NodeId, usize> = nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        let mut out = vec![Vec::new(); nodes.len()];
        let mut inc = vec![Vec::new(); nodes.len()];
        for (i, &node) in nodes.iter().enumerate() {
            for (edge, neighbor) in graph.neighbors(node, None, Direction::Outgoing) {
                let Some(&j) = index.get(&neighbor) else { continue };
                let w = edge_weight(graph, edge, weight);
                out[i].push(Link { edge, node: j, weight: w });
                inc[j].push(Link { edge, node: i, weight: w });
            }
        }
        Self { nodes, index, out, inc }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Edges in either direction; a self-loop appears twice.
    pub fn undirected(&self, i: usize) -> impl Iterator<Item = &Link> {
        self.out[i].iter().chain(self.inc[i].iter())
    }

    /// Every edge once, as `(src, dst, link)`.
    pub fn edges(&self) -> impl Iterator<Item = (usize, &Link)> {
        self.out.iter().enumerate().flat_map(|(i, links)| links.iter().map(move |l| (i, l)))
    }

    /// Distinct undirected neighbors of each node, self-loops excluded.
    pub fn simple_neighbors(&self) -> Vec<Vec<usize>> {
        (0..self.len())
            .map(|i| {
                let mut ns: Vec<usize> = self.undirected(i).map(|l| l.node).filter(|&j| j != i).collect();
                ns.sort_unstable();
                ns.dedup();
                ns
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod test_graphs {
    use crate::model::{props, NodeId, PropertyMap, Value};
    use crate::storage::GraphSnapshot;
    use crate::tx::{GraphWriter, IdAllocator, WriteSet};

    /// Builds a snapshot with `n` nodes and weighted `T` edges.
    pub fn weighted(n: usize, edges: &[(usize, usize, f64)]) -> (GraphSnapshot, Vec<NodeId>) {
        let mut graph = GraphSnapshot::empty(16);
        let mut log = WriteSet::new();
        let ids = IdAllocator::default();
        let mut w = GraphWriter::new(&mut graph, &mut log, &ids);
        let nodes: Vec<NodeId> = (0..n).map(|_| w.create_node(&["N"], PropertyMap::new())).collect();
        for &(a, b, weight) in edges {
            w.create_edge(nodes[a], nodes[b], "T", props([("w", Value::Float(weight))])).unwrap();
        }
        (graph, nodes)
    }

    pub fn unweighted(n: usize, edges: &[(usize, usize)]) -> (GraphSnapshot, Vec<NodeId>) {
        let weighted_edges: Vec<(usize, usize, f64)> = edges.iter().map(|&(a, b)| (a, b, 1.0)).collect();
        weighted(n, &weighted_edges)
    }
}
