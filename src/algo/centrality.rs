//! Centrality: degree, PageRank, betweenness and closeness.
//!
//! These measure node importance from the link structure. All of them
//! follow edge direction except where noted.

use std::collections::VecDeque;

use hashbrown::HashMap;
use serde::Serialize;
use tracing::debug;

use crate::model::NodeId;
use crate::storage::GraphSnapshot;

use super::IndexedGraph;

/// In, out and total degree of every node.
#[derive(Debug, Clone, Serialize)]
pub struct DegreeCentrality {
    pub in_degree: HashMap<NodeId, usize>,
    pub out_degree: HashMap<NodeId, usize>,
    pub total_degree: HashMap<NodeId, usize>,
}

/// O(V + E).
pub fn degree_centrality(graph: &GraphSnapshot) -> DegreeCentrality {
    let g = IndexedGraph::build(graph, None);
    let mut result = DegreeCentrality {
        in_degree: HashMap::with_capacity(g.len()),
        out_degree: HashMap::with_capacity(g.len()),
        total_degree: HashMap::with_capacity(g.len()),
    };
    for (i, &node) in g.nodes.iter().enumerate() {
        let (d_in, d_out) = (g.inc[i].len(), g.out[i].len());
        result.in_degree.insert(node, d_in);
        result.out_degree.insert(node, d_out);
        result.total_degree.insert(node, d_in + d_out);
    }
    result
}

/// Total degree divided by `n - 1`.
pub fn degree_centrality_normalized(graph: &GraphSnapshot) -> HashMap<NodeId, f64> {
    let degrees = degree_centrality(graph).total_degree;
    let norm = degrees.len().saturating_sub(1);
    degrees
        .into_iter()
        .map(|(node, d)| (node, if norm == 0 { 0.0 } else { d as f64 / norm as f64 }))
        .collect()
}

/// PageRank by power iteration.
///
/// Dangling nodes spread their score evenly over all nodes, so the scores
/// always sum to 1. Stops after `max_iterations` or once no score moves
/// by more than `tolerance`.
pub fn pagerank(graph: &GraphSnapshot, damping: f64, max_iterations: usize, tolerance: f64) -> HashMap<NodeId, f64> {
    let g = IndexedGraph::build(graph, None);
    let n = g.len();
    if n == 0 {
        return HashMap::new();
    }
    let nf = n as f64;
    let mut scores = vec![1.0 / nf; n];
    let mut next = vec![0.0; n];
    let dangling: Vec<usize> = (0..n).filter(|&i| g.out[i].is_empty()).collect();

    let mut iterations = 0;
    for _ in 0..max_iterations {
        iterations += 1;
        let dangling_sum: f64 = dangling.iter().map(|&i| scores[i]).sum();
        let base = (1.0 - damping) / nf + damping * dangling_sum / nf;
        next.iter_mut().for_each(|s| *s = base);
        for (i, links) in g.out.iter().enumerate() {
            if links.is_empty() {
                continue;
            }
            let share = damping * scores[i] / links.len() as f64;
            for link in links {
                next[link.node] += share;
            }
        }
        let delta = scores.iter().zip(&next).map(|(a, b)| (a - b).abs()).fold(0.0, f64::max);
        std::mem::swap(&mut scores, &mut next);
        if delta < tolerance {
            break;
        }
    }
    debug!(nodes = n, iterations, "pagerank finished");
    g.nodes.into_iter().zip(scores).collect()
}

/// Betweenness (Brandes), unweighted. `normalized` scales by
/// `1 / ((n - 1)(n - 2))`.
pub fn betweenness_centrality(graph: &GraphSnapshot, normalized: bool) -> HashMap<NodeId, f64> {
    let g = IndexedGraph::build(graph, None);
    let n = g.len();
    let mut centrality = vec![0.0; n];

    for source in 0..n {
        let mut stack = Vec::with_capacity(n);
        let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut sigma = vec![0.0f64; n];
        let mut dist = vec![usize::MAX; n];
        sigma[source] = 1.0;
        dist[source] = 0;
        let mut queue = VecDeque::from([source]);
        while let Some(v) = queue.pop_front() {
            stack.push(v);
            for link in &g.out[v] {
                let w = link.node;
                if dist[w] == usize::MAX {
                    dist[w] = dist[v] + 1;
                    queue.push_back(w);
                }
                if dist[w] == dist[v] + 1 {
                    sigma[w] += sigma[v];
                    predecessors[w].push(v);
                }
            }
        }
        let mut delta = vec![0.0f64; n];
        while let Some(w) = stack.pop() {
            for &v in &predecessors[w] {
                delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
            }
            if w != source {
                centrality[w] += delta[w];
            }
        }
    }

    if normalized && n > 2 {
        let scale = 1.0 / ((n - 1) * (n - 2)) as f64;
        centrality.iter_mut().for_each(|c| *c *= scale);
    }
    g.nodes.into_iter().zip(centrality).collect()
}

/// Closeness: reachable count over total hop distance. With
/// `wf_improved` the score is further scaled by the reachable fraction
/// (Wasserman-Faust), which keeps small components from scoring high.
pub fn closeness_centrality(graph: &GraphSnapshot, wf_improved: bool) -> HashMap<NodeId, f64> {
    let g = IndexedGraph::build(graph, None);
    let n = g.len();
    let mut out = HashMap::with_capacity(n);
    for source in 0..n {
        let mut dist = vec![usize::MAX; n];
        dist[source] = 0;
        let mut queue = VecDeque::from([source]);
        let (mut reachable, mut total) = (0usize, 0usize);
        while let Some(v) = queue.pop_front() {
            for link in &g.out[v] {
                if dist[link.node] == usize::MAX {
                    dist[link.node] = dist[v] + 1;
                    reachable += 1;
                    total += dist[link.node];
                    queue.push_back(link.node);
                }
            }
        }
        let score = if total == 0 {
            0.0
        } else if wf_improved {
            (reachable as f64 / (n - 1) as f64) * (reachable as f64 / total as f64)
        } else {
            reachable as f64 / total as f64
        };
        out.insert(g.nodes[source], score);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::test_graphs::unweighted;

    #[test]
    fn test_degrees() {
        let (g, n) = unweighted(3, &[(0, 1), (0, 2), (1, 2)]);
        let d = degree_centrality(&g);
        assert_eq!(d.out_degree[&n[0]], 2);
        assert_eq!(d.in_degree[&n[2]], 2);
        assert_eq!(d.total_degree[&n[1]], 2);
        assert_eq!(degree_centrality_normalized(&g)[&n[0]], 1.0);
    }

    #[test]
    fn test_pagerank_sums_to_one_with_dangling_nodes() {
        let (g, n) = unweighted(4, &[(0, 1), (1, 2), (2, 0), (3, 2)]);
        let pr = pagerank(&g, 0.85, 100, 1e-9);
        let sum: f64 = pr.values().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(pr[&n[2]] > pr[&n[3]]);

        let (sink, _) = unweighted(3, &[(0, 1), (0, 2)]);
        let sum: f64 = pagerank(&sink, 0.85, 100, 1e-9).values().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_betweenness_on_path() {
        let (g, n) = unweighted(3, &[(0, 1), (1, 2)]);
        let bc = betweenness_centrality(&g, false);
        assert_eq!(bc[&n[1]], 1.0);
        assert_eq!(bc[&n[0]], 0.0);
        assert_eq!(betweenness_centrality(&g, true)[&n[1]], 0.5);
    }

    #[test]
    fn test_closeness() {
        let (g, n) = unweighted(3, &[(0, 1), (1, 2)]);
        let cc = closeness_centrality(&g, false);
        // reachable 2, total 1 + 2
        assert!((cc[&n[0]] - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(cc[&n[2]], 0.0);
        let wf = closeness_centrality(&g, true);
        assert!((wf[&n[1]] - 0.5).abs() < 1e-12);
    }
}
