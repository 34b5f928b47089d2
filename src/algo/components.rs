//! Connectivity: weak and strong components, DAG check, topological sort.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use hashbrown::HashMap;

use crate::model::NodeId;
use crate::storage::GraphSnapshot;

use super::IndexedGraph;

/// Disjoint sets with path halving and union by size.
pub(crate) struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    pub(crate) fn new(n: usize) -> Self {
        Self { parent: (0..n).collect(), size: vec![1; n] }
    }

    pub(crate) fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Returns false if `a` and `b` were already joined.
    pub(crate) fn union(&mut self, a: usize, b: usize) -> bool {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
        true
    }
}

/// Weakly connected components, edge direction ignored.
///
/// Component ids are dense and numbered by the smallest node id they contain.
pub fn connected_components(graph: &GraphSnapshot) -> HashMap<NodeId, usize> {
    let g = IndexedGraph::build(graph, None);
    let mut sets = UnionFind::new(g.len());
    for (src, link) in g.edges() {
        sets.union(src, link.node);
    }
    let mut ids: HashMap<usize, usize> = HashMap::new();
    let mut out = HashMap::with_capacity(g.len());
    for (i, &node) in g.nodes.iter().enumerate() {
        let root = sets.find(i);
        let next = ids.len();
        let component = *ids.entry(root).or_insert(next);
        out.insert(node, component);
    }
    out
}

pub fn connected_component_count(graph: &GraphSnapshot) -> usize {
    let g = IndexedGraph::build(graph, None);
    let mut sets = UnionFind::new(g.len());
    let merges = g.edges().filter(|(src, link)| sets.union(*src, link.node)).count();
    g.len() - merges
}

/// Strongly connected components (Tarjan), each sorted by id. Components
/// are listed in reverse topological order of the condensation.
pub fn strongly_connected_components(graph: &GraphSnapshot) -> Vec<Vec<NodeId>> {
    let g = IndexedGraph::build(graph, None);
    let n = g.len();
    const UNSEEN: usize = usize::MAX;
    let mut index = vec![UNSEEN; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;
    let mut components = Vec::new();

    for root in 0..n {
        if index[root] != UNSEEN {
            continue;
        }
        // (node, position in its out list)
        let mut call: Vec<(usize, usize)> = vec![(root, 0)];
        index[root] = next_index;
        low[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;

        while let Some(&(v, pos)) = call.last() {
            if let Some(link) = g.out[v].get(pos) {
                if let Some(frame) = call.last_mut() {
                    frame.1 += 1;
                }
                let w = link.node;
                if index[w] == UNSEEN {
                    index[w] = next_index;
                    low[w] = next_index;
                    next_index += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    call.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
                continue;
            }
            call.pop();
            if let Some(&(parent, _)) = call.last() {
                low[parent] = low[parent].min(low[v]);
            }
            if low[v] == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(g.nodes[w]);
                    if w == v {
                        break;
                    }
                }
                component.sort_unstable();
                components.push(component);
            }
        }
    }
    components
}

/// Kahn's algorithm, smallest ready id first. `None` if there is a cycle.
pub fn topological_sort(graph: &GraphSnapshot) -> Option<Vec<NodeId>> {
    let g = IndexedGraph::build(graph, None);
    let mut in_degree: Vec<usize> = g.inc.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Reverse<usize>> =
        (0..g.len()).filter(|&i| in_degree[i] == 0).map(Reverse).collect();
    let mut order = Vec::with_capacity(g.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(g.nodes[i]);
        for link in &g.out[i] {
            in_degree[link.node] -= 1;
            if in_degree[link.node] == 0 {
                ready.push(Reverse(link.node));
            }
        }
    }
    (order.len() == g.len()).then_some(order)
}

/// Whether the graph has no directed cycle (self-loops count as cycles).
pub fn is_dag(graph: &GraphSnapshot) -> bool {
    topological_sort(graph).is_some()
}
