//! Topology index: forward and reverse adjacency keyed by node and edge type.
//!
//! Each node owns an `Arc`-shared adjacency record in an [`IdMap`], so a
//! new snapshot version only copies the records of nodes whose edges
//! changed, plus the trie paths leading to them.

use std::sync::Arc;

use crate::model::{Direction, EdgeId, NodeId};
use super::id_map::IdMap;

/// Adjacency entries for one edge type, in edge-creation order.
type AdjList = Vec<(EdgeId, NodeId)>;

#[derive(Debug, Clone, Default)]
struct Adjacency {
    /// Outgoing edges grouped by type, kept sorted by type name.
    out: Vec<(String, AdjList)>,
    /// Incoming edges grouped by type, kept sorted by type name.
    inc: Vec<(String, AdjList)>,
}

fn list_mut<'a>(groups: &'a mut Vec<(String, AdjList)>, edge_type: &str) -> &'a mut AdjList {
    let pos = match groups.binary_search_by(|(t, _)| t.as_str().cmp(edge_type)) {
        Ok(pos) => pos,
        Err(pos) => {
            groups.insert(pos, (edge_type.to_string(), Vec::new()));
            pos
        }
    };
    &mut groups[pos].1
}

fn remove_from(groups: &mut Vec<(String, AdjList)>, edge_type: &str, edge: EdgeId) {
    if let Ok(pos) = groups.binary_search_by(|(t, _)| t.as_str().cmp(edge_type)) {
        groups[pos].1.retain(|(e, _)| *e != edge);
        if groups[pos].1.is_empty() {
            groups.remove(pos);
        }
    }
}

fn select<'a>(
    groups: &'a [(String, AdjList)],
    edge_type: Option<&'a str>,
) -> impl Iterator<Item = (EdgeId, NodeId)> + 'a {
    groups
        .iter()
        .filter(move |(t, _)| edge_type.is_none_or(|want| t == want))
        .flat_map(|(_, list)| list.iter().copied())
}

/// Adjacency index over all nodes of a snapshot.
#[derive(Debug, Clone, Default)]
pub struct TopologyIndex {
    nodes: IdMap<NodeId, Arc<Adjacency>>,
    edge_count: usize,
}

impl TopologyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: NodeId) {
        self.nodes.get_or_insert_with(node, Default::default);
    }

    /// Drops a node's adjacency record. Incident edges must already be gone.
    pub fn remove_node(&mut self, node: NodeId) {
        self.nodes.remove(node);
    }

    pub fn add_edge(&mut self, edge: EdgeId, src: NodeId, dst: NodeId, edge_type: &str) {
        let out = Arc::make_mut(self.nodes.get_or_insert_with(src, Default::default));
        list_mut(&mut out.out, edge_type).push((edge, dst));
        let inc = Arc::make_mut(self.nodes.get_or_insert_with(dst, Default::default));
        list_mut(&mut inc.inc, edge_type).push((edge, src));
        self.edge_count += 1;
    }

    pub fn remove_edge(&mut self, edge: EdgeId, src: NodeId, dst: NodeId, edge_type: &str) {
        if let Some(adj) = self.nodes.get_mut(src) {
            remove_from(&mut Arc::make_mut(adj).out, edge_type, edge);
        }
        if let Some(adj) = self.nodes.get_mut(dst) {
            remove_from(&mut Arc::make_mut(adj).inc, edge_type, edge);
        }
        self.edge_count = self.edge_count.saturating_sub(1);
    }

    /// Lazily yields `(edge, neighbor)` pairs adjacent to `node`.
    ///
    /// With `Direction::Both` a self-loop is reported once.
    pub fn neighbors<'a>(
        &'a self,
        node: NodeId,
        edge_type: Option<&'a str>,
        direction: Direction,
    ) -> Box<dyn Iterator<Item = (EdgeId, NodeId)> + 'a> {
        let Some(adj) = self.nodes.get(node) else {
            return Box::new(std::iter::empty());
        };
        match direction {
            Direction::Outgoing => Box::new(select(&adj.out, edge_type)),
            Direction::Incoming => Box::new(select(&adj.inc, edge_type)),
            Direction::Both => Box::new(
                select(&adj.out, edge_type)
                    .chain(select(&adj.inc, edge_type).filter(move |(_, n)| *n != node)),
            ),
        }
    }

    pub fn degree(&self, node: NodeId, direction: Direction) -> usize {
        let Some(adj) = self.nodes.get(node) else { return 0 };
        let count = |groups: &[(String, AdjList)]| groups.iter().map(|(_, l)| l.len()).sum::<usize>();
        match direction {
            Direction::Outgoing => count(&adj.out),
            Direction::Incoming => count(&adj.inc),
            Direction::Both => self.neighbors(node, None, Direction::Both).count(),
        }
    }

    /// Degree restricted to one edge type.
    pub fn typed_degree(&self, node: NodeId, edge_type: &str, direction: Direction) -> usize {
        self.neighbors(node, Some(edge_type), direction).count()
    }

    /// Distinct edges touching `node`, in either direction.
    pub fn incident_edges(&self, node: NodeId) -> Vec<EdgeId> {
        let mut edges: Vec<EdgeId> =
            self.neighbors(node, None, Direction::Both).map(|(e, _)| e).collect();
        edges.sort_unstable();
        edges.dedup();
        edges
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }
}
