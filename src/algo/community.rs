//! Community detection: label propagation and Louvain.
//!
//! Both treat the graph as undirected.

use hashbrown::HashMap;
use serde::Serialize;
use tracing::debug;

use crate::model::NodeId;
use crate::storage::GraphSnapshot;

use super::IndexedGraph;

/// Synchronous-free label propagation.
///
/// Every node starts in its own community, labeled with its id. Nodes are
/// visited in id order and adopt the most frequent label among their
/// neighbors, ties going to the smallest label. Stops once a full pass
/// changes nothing or after `max_iterations` passes.
pub fn label_propagation(graph: &GraphSnapshot, max_iterations: usize) -> HashMap<NodeId, u64> {
    let g = IndexedGraph::build(graph, None);
    let neighbors = g.simple_neighbors();
    let mut labels: Vec<u64> = g.nodes.iter().map(|n| n.0).collect();

    let mut passes = 0;
    for _ in 0..max_iterations {
        passes += 1;
        let mut changed = false;
        for i in 0..g.len() {
            if neighbors[i].is_empty() {
                continue;
            }
            let mut counts: HashMap<u64, usize> = HashMap::new();
            for &j in &neighbors[i] {
                *counts.entry(labels[j]).or_insert(0) += 1;
            }
            let best = counts
                .into_iter()
                .max_by(|(la, ca), (lb, cb)| ca.cmp(cb).then(lb.cmp(la)))
                .map(|(label, _)| label);
            if let Some(best) = best {
                if best != labels[i] {
                    labels[i] = best;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    debug!(nodes = g.len(), passes, "label propagation finished");
    g.nodes.into_iter().zip(labels).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct LouvainResult {
    /// Dense community id per node.
    pub communities: HashMap<NodeId, usize>,
    pub num_communities: usize,
    pub modularity: f64,
}

/// Weighted undirected graph over community indexes, used between
/// aggregation levels.
struct Level {
    /// `adj[i]` maps neighbor to summed edge weight; self-loops hold the
    /// doubled internal weight.
    adj: Vec<HashMap<usize, f64>>,
}

impl Level {
    fn degree(&self, i: usize) -> f64 {
        self.adj[i].values().sum()
    }
}

/// Louvain modularity optimisation.
///
/// Local moves then aggregation, repeated until a level makes no move.
/// `resolution` scales the null model term (1.0 is standard modularity).
pub fn louvain(graph: &GraphSnapshot, weight: Option<&str>, resolution: f64) -> LouvainResult {
    let g = IndexedGraph::build(graph, weight);
    let n = g.len();
    let mut adj: Vec<HashMap<usize, f64>> = vec![HashMap::new(); n];
    for (src, link) in g.edges() {
        *adj[src].entry(link.node).or_insert(0.0) += link.weight;
        *adj[link.node].entry(src).or_insert(0.0) += link.weight;
    }
    let base = Level { adj };
    let two_m: f64 = (0..n).map(|i| base.degree(i)).sum();

    // node -> community in the current level's index space
    let mut membership: Vec<usize> = (0..n).collect();
    if two_m > 0.0 {
        let mut level = Level { adj: base.adj.clone() };
        let mut rounds = 0;
        loop {
            rounds += 1;
            let (assignment, moved) = local_moves(&level, two_m, resolution);
            if !moved {
                break;
            }
            let (dense, count) = densify(&assignment);
            for m in membership.iter_mut() {
                *m = dense[*m];
            }
            level = aggregate(&level, &dense, count);
            if rounds > n {
                break;
            }
        }
        debug!(nodes = n, rounds, "louvain finished");
    }

    let (dense, num_communities) = densify(&membership);
    let modularity = modularity(&base, &dense, two_m, resolution);
    LouvainResult {
        communities: g.nodes.iter().copied().zip(dense).collect(),
        num_communities,
        modularity,
    }
}

/// One pass of greedy moves. Returns the community of each vertex and
/// whether anything moved.
fn local_moves(level: &Level, two_m: f64, resolution: f64) -> (Vec<usize>, bool) {
    let n = level.adj.len();
    let degree: Vec<f64> = (0..n).map(|i| level.degree(i)).collect();
    let mut community: Vec<usize> = (0..n).collect();
    let mut totals = degree.clone();
    let mut moved_any = false;

    loop {
        let mut moved = false;
        for i in 0..n {
            let current = community[i];
            let mut links: HashMap<usize, f64> = HashMap::new();
            for (&j, &w) in &level.adj[i] {
                if j != i {
                    *links.entry(community[j]).or_insert(0.0) += w;
                }
            }
            totals[current] -= degree[i];
            let gain = |c: usize, k_in: f64| k_in - resolution * totals[c] * degree[i] / two_m;
            let mut best = current;
            let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));
            let mut candidates: Vec<(usize, f64)> = links.into_iter().collect();
            candidates.sort_unstable_by_key(|(c, _)| *c);
            for (c, k_in) in candidates {
                let g = gain(c, k_in);
                if g > best_gain + 1e-12 {
                    best = c;
                    best_gain = g;
                }
            }
            totals[best] += degree[i];
            if best != current {
                community[i] = best;
                moved = true;
                moved_any = true;
            }
        }
        if !moved {
            break;
        }
    }
    (community, moved_any)
}

/// Renumbers labels densely in first-seen order.
fn densify(labels: &[usize]) -> (Vec<usize>, usize) {
    let mut ids: HashMap<usize, usize> = HashMap::new();
    let dense = labels
        .iter()
        .map(|&l| {
            let next = ids.len();
            *ids.entry(l).or_insert(next)
        })
        .collect();
    (dense, ids.len())
}

fn aggregate(level: &Level, community: &[usize], count: usize) -> Level {
    let mut adj: Vec<HashMap<usize, f64>> = vec![HashMap::new(); count];
    for (i, edges) in level.adj.iter().enumerate() {
        for (&j, &w) in edges {
            *adj[community[i]].entry(community[j]).or_insert(0.0) += w;
        }
    }
    Level { adj }
}

fn modularity(level: &Level, community: &[usize], two_m: f64, resolution: f64) -> f64 {
    if two_m == 0.0 {
        return 0.0;
    }
    let mut internal: HashMap<usize, f64> = HashMap::new();
    let mut totals: HashMap<usize, f64> = HashMap::new();
    for (i, edges) in level.adj.iter().enumerate() {
        *totals.entry(community[i]).or_insert(0.0) += level.degree(i);
        for (&j, &w) in edges {
            if community[i] == community[j] {
                *internal.entry(community[i]).or_insert(0.0) += w;
            }
        }
    }
    totals
        .iter()
        .map(|(c, tot)| {
            let inside = internal.get(c).copied().unwrap_or(0.0);
            inside / two_m - resolution * (tot / two_m).powi(2)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::test_graphs::unweighted;

    /// Two triangles joined by a single bridge 2 - 3.
    fn two_triangles() -> (GraphSnapshot, Vec<NodeId>) {
        unweighted(6, &[(0, 1), (1, 2), (2, 0), (3, 4), (4, 5), (5, 3), (2, 3)])
    }

    #[test]
    fn test_label_propagation_on_disconnected_cliques() {
        let (g, n) = unweighted(6, &[(0, 1), (1, 2), (2, 0), (3, 4), (4, 5), (5, 3)]);
        let labels = label_propagation(&g, 20);
        assert_eq!(labels[&n[0]], labels[&n[1]]);
        assert_eq!(labels[&n[1]], labels[&n[2]]);
        assert_eq!(labels[&n[3]], labels[&n[5]]);
        assert_ne!(labels[&n[0]], labels[&n[3]]);
    }

    #[test]
    fn test_label_propagation_isolated_node_keeps_own_label() {
        let (g, n) = unweighted(2, &[]);
        let labels = label_propagation(&g, 5);
        assert_eq!(labels[&n[0]], n[0].0);
        assert_eq!(labels[&n[1]], n[1].0);
    }

    #[test]
    fn test_louvain_splits_triangles() {
        let (g, n) = two_triangles();
        let result = louvain(&g, None, 1.0);
        assert_eq!(result.num_communities, 2);
        assert_eq!(result.communities[&n[0]], result.communities[&n[2]]);
        assert_eq!(result.communities[&n[3]], result.communities[&n[5]]);
        assert_ne!(result.communities[&n[0]], result.communities[&n[3]]);
        // 2 * (6/14 - (7/14)^2)
        assert!((result.modularity - 5.0 / 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_louvain_empty_graph() {
        let (g, _) = unweighted(0, &[]);
        let result = louvain(&g, None, 1.0);
        assert_eq!(result.num_communities, 0);
        assert_eq!(result.modularity, 0.0);
    }
}
