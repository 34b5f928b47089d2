//! Graph traversal: BFS and DFS along outgoing edges.
//!
//! Every traversal keeps a visited set, so cycles are safe. Starting from
//! a node that does not exist yields an empty result.

use std::collections::VecDeque;

use hashbrown::HashSet;

use crate::model::{Direction, NodeId};
use crate::storage::GraphSnapshot;

/// Breadth-first search from `start`. Returns nodes in discovery order.
pub fn bfs(graph: &GraphSnapshot, start: NodeId) -> Vec<NodeId> {
    let mut discovered = HashSet::new();
    let mut order = Vec::new();
    bfs_from(graph, start, &mut discovered, &mut order);
    order
}

fn bfs_from(graph: &GraphSnapshot, start: NodeId, discovered: &mut HashSet<NodeId>, order: &mut Vec<NodeId>) {
    if !graph.contains_node(start) || !discovered.insert(start) {
        return;
    }
    let mut queue = VecDeque::from([start]);
    order.push(start);
    while let Some(node) = queue.pop_front() {
        for (_, neighbor) in graph.neighbors(node, None, Direction::Outgoing) {
            if discovered.insert(neighbor) {
                order.push(neighbor);
                queue.push_back(neighbor);
            }
        }
    }
}

/// Nodes grouped by hop distance: `result[i]` holds the nodes `i` hops
/// from `start`.
pub fn bfs_layers(graph: &GraphSnapshot, start: NodeId) -> Vec<Vec<NodeId>> {
    let mut layers = Vec::new();
    if !graph.contains_node(start) {
        return layers;
    }
    let mut discovered: HashSet<NodeId> = HashSet::from([start]);
    let mut current = vec![start];
    while !current.is_empty() {
        let mut next = Vec::new();
        for &node in &current {
            for (_, neighbor) in graph.neighbors(node, None, Direction::Outgoing) {
                if discovered.insert(neighbor) {
                    next.push(neighbor);
                }
            }
        }
        layers.push(std::mem::replace(&mut current, next));
    }
    layers
}

/// BFS restarted from every undiscovered node in id order, so every node
/// appears exactly once.
pub fn bfs_all(graph: &GraphSnapshot) -> Vec<NodeId> {
    let mut discovered = HashSet::new();
    let mut order = Vec::with_capacity(graph.node_count());
    for node in graph.node_ids() {
        bfs_from(graph, node, &mut discovered, &mut order);
    }
    order
}

/// Depth-first search from `start`. Returns nodes in the order they
/// finished (post-order).
pub fn dfs(graph: &GraphSnapshot, start: NodeId) -> Vec<NodeId> {
    let mut visited = HashSet::new();
    let mut finished = Vec::new();
    dfs_from(graph, start, &mut visited, &mut finished);
    finished
}

/// Iterative DFS; each stack frame holds the node's remaining neighbors.
fn dfs_from(graph: &GraphSnapshot, start: NodeId, visited: &mut HashSet<NodeId>, finished: &mut Vec<NodeId>) {
    if !graph.contains_node(start) || !visited.insert(start) {
        return;
    }
    let frontier = |node: NodeId| -> std::vec::IntoIter<NodeId> {
        graph
            .neighbors(node, None, Direction::Outgoing)
            .map(|(_, n)| n)
            .collect::<Vec<_>>()
            .into_iter()
    };
    let mut stack = vec![(start, frontier(start))];
    while let Some((node, pending)) = stack.last_mut() {
        match pending.next() {
            Some(next) => {
                if visited.insert(next) {
                    stack.push((next, frontier(next)));
                }
            }
            None => {
                finished.push(*node);
                stack.pop();
            }
        }
    }
}

/// DFS over every component, in id order of the roots. Post-order.
pub fn dfs_all(graph: &GraphSnapshot) -> Vec<NodeId> {
    let mut visited = HashSet::new();
    let mut finished = Vec::with_capacity(graph.node_count());
    for node in graph.node_ids() {
        dfs_from(graph, node, &mut visited, &mut finished);
    }
    finished
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::test_graphs::unweighted;

    #[test]
    fn test_bfs_order_and_layers() {
        // 0 -> 1, 0 -> 2, 1 -> 3, 2 -> 3, 3 -> 0
        let (g, n) = unweighted(5, &[(0, 1), (0, 2), (1, 3), (2, 3), (3, 0)]);
        assert_eq!(bfs(&g, n[0]), vec![n[0], n[1], n[2], n[3]]);
        assert_eq!(bfs_layers(&g, n[0]), vec![vec![n[0]], vec![n[1], n[2]], vec![n[3]]]);
        assert_eq!(bfs_all(&g).len(), 5);
        assert!(bfs(&g, NodeId(999)).is_empty());
    }

    #[test]
    fn test_dfs_post_order_on_cycle() {
        let (g, n) = unweighted(3, &[(0, 1), (1, 2), (2, 0)]);
        assert_eq!(dfs(&g, n[0]), vec![n[2], n[1], n[0]]);
        let all = dfs_all(&g);
        assert_eq!(all.len(), 3);
    }
}
