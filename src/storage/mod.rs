//! # Graph Storage
//!
//! A [`GraphSnapshot`] is one immutable version of the graph: node and
//! edge records, the columnar [`PropertyStore`]s and the [`TopologyIndex`].
//! Committed versions are published as `Arc<GraphSnapshot>`; the active
//! writer mutates a private clone. Every keyed collection in a snapshot is
//! an [`IdMap`], so the clone is O(1) and shares every record, chunk and
//! adjacency entry the writer has not touched.
//!
//! | Module | Contents |
//! |--------|----------|
//! | `id_map` | persistent id-keyed maps |
//! | `property` | columnar property tables, chunked scans |
//! | `zone_map` | per-chunk min/max/null statistics |
//! | `topology` | forward/reverse adjacency |

pub mod id_map;
pub mod property;
pub mod topology;
pub mod zone_map;

use tracing::trace;

use crate::model::*;
use crate::{Error, Result, RuntimeError};

pub use id_map::{EntityId, IdMap, MapKey};
pub use property::{PropertyStore, ScanIter, ScanPredicate, UNLABELED};
pub use topology::TopologyIndex;
pub use zone_map::{CmpOp, ZoneMap};

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone)]
struct NodeRecord {
    labels: LabelSet,
}

#[derive(Debug, Clone)]
struct EdgeRecord {
    src: NodeId,
    dst: NodeId,
    edge_type: String,
}

/// Everything needed to restore a deleted edge.
#[derive(Debug, Clone)]
pub struct DeletedEdge {
    pub id: EdgeId,
    pub src: NodeId,
    pub dst: NodeId,
    pub edge_type: String,
    pub properties: PropertyMap,
}

// ============================================================================
// GraphSnapshot
// ============================================================================

/// One consistent version of the graph.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    version: u64,
    nodes: IdMap<NodeId, NodeRecord>,
    edges: IdMap<EdgeId, EdgeRecord>,
    node_props: PropertyStore<NodeId>,
    edge_props: PropertyStore<EdgeId>,
    topology: TopologyIndex,
}

impl GraphSnapshot {
    /// An empty version-0 graph.
    pub fn empty(chunk_size: usize) -> Self {
        Self {
            version: 0,
            nodes: IdMap::new(),
            edges: IdMap::new(),
            node_props: PropertyStore::new(chunk_size),
            edge_props: PropertyStore::new(chunk_size),
            topology: TopologyIndex::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    // ========================================================================
    // Node reads
    // ========================================================================

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Materializes a node with its labels and properties.
    pub fn node(&self, id: NodeId) -> Option<Node> {
        let record = self.nodes.get(id)?;
        Some(Node {
            id,
            labels: record.labels.clone(),
            properties: self.node_props.properties(id),
        })
    }

    pub fn labels(&self, id: NodeId) -> Option<&LabelSet> {
        self.nodes.get(id).map(|r| &r.labels)
    }

    pub fn has_label(&self, id: NodeId, label: &str) -> bool {
        self.labels(id).is_some_and(|ls| ls.iter().any(|l| l == label))
    }

    pub fn node_property(&self, id: NodeId, key: &str) -> Option<&Value> {
        self.node_props.get(id, key)
    }

    pub fn node_properties(&self, id: NodeId) -> PropertyMap {
        self.node_props.properties(id)
    }

    /// All node ids in ascending order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().collect()
    }

    /// Number of nodes carrying `label`.
    pub fn label_count(&self, label: &str) -> usize {
        self.node_props.count(label)
    }

    /// Known labels, sorted.
    pub fn label_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .node_props
            .table_counts()
            .filter(|(name, count)| *name != UNLABELED && *count > 0)
            .map(|(name, _)| name.to_string())
            .collect();
        names.sort();
        names
    }

    /// Lazily scans the nodes carrying `label` with zone-map pruning.
    pub fn scan_nodes<'a>(&'a self, label: &str, predicates: &'a [ScanPredicate]) -> ScanIter<'a, NodeId> {
        self.node_props.scan(label, predicates)
    }

    pub fn chunk_size(&self) -> usize {
        self.node_props.chunk_size()
    }

    // ========================================================================
    // Edge reads
    // ========================================================================

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains_edge(&self, id: EdgeId) -> bool {
        self.edges.contains_key(id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<Edge> {
        let record = self.edges.get(id)?;
        Some(Edge {
            id,
            src: record.src,
            dst: record.dst,
            edge_type: record.edge_type.clone(),
            properties: self.edge_props.properties(id),
        })
    }

    pub fn edge_endpoints(&self, id: EdgeId) -> Option<(NodeId, NodeId)> {
        self.edges.get(id).map(|r| (r.src, r.dst))
    }

    pub fn edge_type(&self, id: EdgeId) -> Option<&str> {
        self.edges.get(id).map(|r| r.edge_type.as_str())
    }

    pub fn edge_property(&self, id: EdgeId, key: &str) -> Option<&Value> {
        self.edge_props.get(id, key)
    }

    pub fn edge_properties(&self, id: EdgeId) -> PropertyMap {
        self.edge_props.properties(id)
    }

    /// All edge ids in ascending order.
    pub fn edge_ids(&self) -> Vec<EdgeId> {
        self.edges.keys().collect()
    }

    pub fn edge_type_count(&self, edge_type: &str) -> usize {
        self.edge_props.count(edge_type)
    }

    /// Known edge types, sorted.
    pub fn edge_type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .edge_props
            .table_counts()
            .filter(|(_, count)| *count > 0)
            .map(|(name, _)| name.to_string())
            .collect();
        names.sort();
        names
    }

    /// Lazily scans the edges of one type with zone-map pruning.
    pub fn scan_edges<'a>(&'a self, edge_type: &str, predicates: &'a [ScanPredicate]) -> ScanIter<'a, EdgeId> {
        self.edge_props.scan(edge_type, predicates)
    }

    // ========================================================================
    // Topology reads
    // ========================================================================

    /// `(edge, neighbor)` pairs adjacent to `node`.
    pub fn neighbors<'a>(
        &'a self,
        node: NodeId,
        edge_type: Option<&'a str>,
        direction: Direction,
    ) -> Box<dyn Iterator<Item = (EdgeId, NodeId)> + 'a> {
        self.topology.neighbors(node, edge_type, direction)
    }

    pub fn degree(&self, node: NodeId, direction: Direction) -> usize {
        self.topology.degree(node, direction)
    }

    pub fn typed_degree(&self, node: NodeId, edge_type: &str, direction: Direction) -> usize {
        self.topology.typed_degree(node, edge_type, direction)
    }

    pub fn incident_edges(&self, node: NodeId) -> Vec<EdgeId> {
        self.topology.incident_edges(node)
    }

    // ========================================================================
    // Mutation (writer working copy only)
    // ========================================================================

    pub(crate) fn insert_node(&mut self, id: NodeId, labels: LabelSet, props: &PropertyMap) {
        let tables: Vec<&str> = if labels.is_empty() {
            vec![UNLABELED]
        } else {
            labels.iter().map(String::as_str).collect()
        };
        self.node_props.insert(id, &tables, props);
        self.topology.add_node(id);
        self.nodes.insert(id, NodeRecord { labels });
        trace!(node = %id, "node inserted");
    }

    pub(crate) fn insert_edge(
        &mut self,
        id: EdgeId,
        src: NodeId,
        dst: NodeId,
        edge_type: &str,
        props: &PropertyMap,
    ) -> Result<()> {
        if !self.contains_node(src) {
            return Err(Error::NotFound(format!("source node {src}")));
        }
        if !self.contains_node(dst) {
            return Err(Error::NotFound(format!("target node {dst}")));
        }
        self.edge_props.insert(id, &[edge_type], props);
        self.topology.add_edge(id, src, dst, edge_type);
        self.edges.insert(id, EdgeRecord { src, dst, edge_type: edge_type.to_string() });
        trace!(edge = %id, %src, %dst, edge_type, "edge inserted");
        Ok(())
    }

    pub(crate) fn remove_edge(&mut self, id: EdgeId) -> Option<DeletedEdge> {
        let record = self.edges.remove(id)?;
        self.topology.remove_edge(id, record.src, record.dst, &record.edge_type);
        let properties = self.edge_props.delete(id);
        Some(DeletedEdge {
            id,
            src: record.src,
            dst: record.dst,
            edge_type: record.edge_type,
            properties,
        })
    }

    /// Removes a node that has no incident edges.
    pub(crate) fn remove_node(&mut self, id: NodeId) -> Result<(LabelSet, PropertyMap)> {
        if !self.contains_node(id) {
            return Err(Error::NotFound(format!("node {id}")));
        }
        let degree = self.topology.incident_edges(id).len();
        if degree > 0 {
            return Err(RuntimeError::ConstraintViolation(format!(
                "cannot delete node {id} with {degree} edges; use DETACH DELETE"
            ))
            .into());
        }
        let record = self.nodes.remove(id).map(|r| r.labels).unwrap_or_default();
        let props = self.node_props.delete(id);
        self.topology.remove_node(id);
        Ok((record, props))
    }

    pub(crate) fn set_node_property(&mut self, id: NodeId, key: &str, value: Value) -> Result<Option<Value>> {
        if !self.contains_node(id) {
            return Err(Error::NotFound(format!("node {id}")));
        }
        Ok(self.node_props.put(id, key, value))
    }

    pub(crate) fn set_edge_property(&mut self, id: EdgeId, key: &str, value: Value) -> Result<Option<Value>> {
        if !self.contains_edge(id) {
            return Err(Error::NotFound(format!("edge {id}")));
        }
        Ok(self.edge_props.put(id, key, value))
    }

    /// Adds a label. Returns false if the node already had it.
    pub(crate) fn add_label(&mut self, id: NodeId, label: &str) -> Result<bool> {
        let record = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("node {id}")))?;
        if record.labels.iter().any(|l| l == label) {
            return Ok(false);
        }
        let was_unlabeled = record.labels.is_empty();
        record.labels.push(label.to_string());
        self.node_props.add_membership(id, label);
        if was_unlabeled {
            self.node_props.remove_membership(id, UNLABELED);
        }
        Ok(true)
    }

    /// Removes a label. Returns false if the node did not have it.
    pub(crate) fn remove_label(&mut self, id: NodeId, label: &str) -> Result<bool> {
        let record = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("node {id}")))?;
        let Some(pos) = record.labels.iter().position(|l| l == label) else {
            return Ok(false);
        };
        record.labels.remove(pos);
        if record.labels.is_empty() {
            self.node_props.add_membership(id, UNLABELED);
        }
        self.node_props.remove_membership(id, label);
        Ok(true)
    }
}
