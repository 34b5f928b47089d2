//! Structural analysis: articulation points, bridges and k-cores.
//!
//! All three view the graph as undirected.

use hashbrown::HashMap;
use serde::Serialize;

use crate::model::{EdgeId, NodeId};
use crate::storage::GraphSnapshot;

use super::IndexedGraph;

/// Output of one iterative low-link DFS over the whole graph.
struct LowLink {
    cut_nodes: Vec<bool>,
    bridges: Vec<EdgeId>,
}

/// Tarjan's low-link DFS. The tree edge back to the parent is skipped by
/// edge id, so a parallel edge still counts as a back edge.
fn low_link(g: &IndexedGraph) -> LowLink {
    let n = g.len();
    let adj: Vec<Vec<(usize, EdgeId)>> = (0..n)
        .map(|i| g.undirected(i).filter(|l| l.node != i).map(|l| (l.node, l.edge)).collect())
        .collect();
    const UNSEEN: usize = usize::MAX;
    let mut disc = vec![UNSEEN; n];
    let mut low = vec![0usize; n];
    let mut out = LowLink { cut_nodes: vec![false; n], bridges: Vec::new() };
    let mut time = 0usize;

    for root in 0..n {
        if disc[root] != UNSEEN {
            continue;
        }
        disc[root] = time;
        low[root] = time;
        time += 1;
        let mut root_children = 0usize;
        // (node, edge used to reach it, next adjacency position)
        let mut stack: Vec<(usize, Option<EdgeId>, usize)> = vec![(root, None, 0)];

        while let Some(&(v, via, pos)) = stack.last() {
            if let Some(&(w, edge)) = adj[v].get(pos) {
                if let Some(frame) = stack.last_mut() {
                    frame.2 += 1;
                }
                if Some(edge) == via {
                    continue;
                }
                if disc[w] == UNSEEN {
                    disc[w] = time;
                    low[w] = time;
                    time += 1;
                    if v == root {
                        root_children += 1;
                    }
                    stack.push((w, Some(edge), 0));
                } else {
                    low[v] = low[v].min(disc[w]);
                }
                continue;
            }
            stack.pop();
            if let (Some(&(parent, _, _)), Some(edge)) = (stack.last(), via) {
                low[parent] = low[parent].min(low[v]);
                if low[v] > disc[parent] {
                    out.bridges.push(edge);
                }
                if parent != root && low[v] >= disc[parent] {
                    out.cut_nodes[parent] = true;
                }
            }
        }
        if root_children > 1 {
            out.cut_nodes[root] = true;
        }
    }
    out
}

/// Nodes whose removal disconnects their component, sorted by id.
pub fn articulation_points(graph: &GraphSnapshot) -> Vec<NodeId> {
    let g = IndexedGraph::build(graph, None);
    let result = low_link(&g);
    (0..g.len()).filter(|&i| result.cut_nodes[i]).map(|i| g.nodes[i]).collect()
}

/// Edges whose removal disconnects their component, sorted by id.
pub fn bridges(graph: &GraphSnapshot) -> Vec<EdgeId> {
    let g = IndexedGraph::build(graph, None);
    let mut result = low_link(&g).bridges;
    result.sort_unstable();
    result
}

#[derive(Debug, Clone, Serialize)]
pub struct KCoreResult {
    pub core_numbers: HashMap<NodeId, usize>,
    pub max_core: usize,
}

/// Core number of every node by repeated minimum-degree peeling
/// (Batagelj-Zaversnik bucket order). Parallel edges and self-loops do
/// not add degree.
pub fn kcore(graph: &GraphSnapshot) -> KCoreResult {
    let g = IndexedGraph::build(graph, None);
    let neighbors = g.simple_neighbors();
    let n = g.len();
    let mut degree: Vec<usize> = neighbors.iter().map(Vec::len).collect();
    let max_degree = degree.iter().copied().max().unwrap_or(0);

    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); max_degree + 1];
    for (i, &d) in degree.iter().enumerate() {
        buckets[d].push(i);
    }
    let mut removed = vec![false; n];
    let mut core = vec![0usize; n];
    let mut current = 0usize;
    let mut d = 0usize;
    let mut processed = 0usize;
    while processed < n {
        let Some(v) = buckets[d].pop() else {
            d += 1;
            continue;
        };
        // stale entries left behind when a degree dropped
        if removed[v] || degree[v] != d {
            continue;
        }
        removed[v] = true;
        processed += 1;
        current = current.max(d);
        core[v] = current;
        for &w in &neighbors[v] {
            if !removed[w] && degree[w] > 0 {
                degree[w] -= 1;
                buckets[degree[w]].push(w);
                d = d.min(degree[w]);
            }
        }
    }

    let max_core = core.iter().copied().max().unwrap_or(0);
    KCoreResult { core_numbers: g.nodes.into_iter().zip(core).collect(), max_core }
}

/// Nodes of the `k`-core, sorted by id.
pub fn k_core(graph: &GraphSnapshot, k: usize) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = kcore(graph)
        .core_numbers
        .into_iter()
        .filter(|&(_, c)| c >= k)
        .map(|(n, _)| n)
        .collect();
    nodes.sort_unstable();
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::test_graphs::unweighted;

    #[test]
    fn test_cut_vertices_and_bridges() {
        // triangle 0-1-2, tail 2-3-4
        let (g, n) = unweighted(5, &[(0, 1), (1, 2), (2, 0), (2, 3), (3, 4)]);
        assert_eq!(articulation_points(&g), vec![n[2], n[3]]);
        let bridge_ends: Vec<(NodeId, NodeId)> =
            bridges(&g).into_iter().filter_map(|e| g.edge_endpoints(e)).collect();
        assert_eq!(bridge_ends, vec![(n[2], n[3]), (n[3], n[4])]);
    }

    #[test]
    fn test_parallel_edge_is_not_a_bridge() {
        let (g, _) = unweighted(2, &[(0, 1), (1, 0)]);
        assert!(bridges(&g).is_empty());
        assert!(articulation_points(&g).is_empty());
    }

    #[test]
    fn test_kcore() {
        // 4-clique 0..3 plus pendant 4 on node 0
        let (g, n) =
            unweighted(5, &[(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3), (0, 4)]);
        let result = kcore(&g);
        assert_eq!(result.max_core, 3);
        assert_eq!(result.core_numbers[&n[4]], 1);
        assert_eq!(result.core_numbers[&n[1]], 3);
        assert_eq!(k_core(&g, 3), vec![n[0], n[1], n[2], n[3]]);
        assert_eq!(k_core(&g, 4), Vec::<NodeId>::new());
    }
}
