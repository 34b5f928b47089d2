//! Write set: the undo log of the active writer, and the mutation API that
//! keeps it in step with the writer's working snapshot.
//!
//! Every mutation is applied to the working copy immediately (so the
//! writer reads its own writes) and records how to reverse itself.
//! Rolling back to a [`Savepoint`] replays the log backwards.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::model::*;
use crate::storage::{DeletedEdge, GraphSnapshot};
use crate::Result;

// ============================================================================
// Id allocation
// ============================================================================

/// Global node/edge id counters. Ids are never handed out twice, even when
/// the transaction that drew them rolls back.
#[derive(Debug)]
pub struct IdAllocator {
    next_node: AtomicU64,
    next_edge: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next_node: AtomicU64::new(1), next_edge: AtomicU64::new(1) }
    }

    pub fn node(&self) -> NodeId {
        NodeId(self.next_node.fetch_add(1, Ordering::Relaxed))
    }

    pub fn edge(&self) -> EdgeId {
        EdgeId(self.next_edge.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Undo log
// ============================================================================

#[derive(Debug, Clone)]
enum UndoEntry {
    NodeCreated(NodeId),
    EdgeCreated(EdgeId),
    NodeDeleted { id: NodeId, labels: LabelSet, properties: PropertyMap },
    EdgeDeleted(DeletedEdge),
    NodePropertySet { id: NodeId, key: String, previous: Option<Value> },
    EdgePropertySet { id: EdgeId, key: String, previous: Option<Value> },
    LabelAdded { id: NodeId, label: String },
    LabelRemoved { id: NodeId, label: String },
}

/// Position in the write set to roll back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint(usize);

/// Pending writes of one transaction, newest last.
#[derive(Debug, Default)]
pub struct WriteSet {
    entries: Vec<UndoEntry>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn savepoint(&self) -> Savepoint {
        Savepoint(self.entries.len())
    }

    /// Reverts every write recorded after `savepoint`.
    pub fn rollback_to(&mut self, savepoint: Savepoint, graph: &mut GraphSnapshot) {
        while self.entries.len() > savepoint.0 {
            let Some(entry) = self.entries.pop() else { break };
            if let Err(e) = undo(entry, graph) {
                warn!(error = %e, "undo entry could not be applied");
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn push(&mut self, entry: UndoEntry) {
        self.entries.push(entry);
    }
}

fn undo(entry: UndoEntry, graph: &mut GraphSnapshot) -> Result<()> {
    match entry {
        UndoEntry::NodeCreated(id) => {
            graph.remove_node(id)?;
        }
        UndoEntry::EdgeCreated(id) => {
            graph.remove_edge(id);
        }
        UndoEntry::NodeDeleted { id, labels, properties } => {
            graph.insert_node(id, labels, &properties);
        }
        UndoEntry::EdgeDeleted(e) => {
            graph.insert_edge(e.id, e.src, e.dst, &e.edge_type, &e.properties)?;
        }
        UndoEntry::NodePropertySet { id, key, previous } => {
            graph.set_node_property(id, &key, previous.unwrap_or(Value::Null))?;
        }
        UndoEntry::EdgePropertySet { id, key, previous } => {
            graph.set_edge_property(id, &key, previous.unwrap_or(Value::Null))?;
        }
        UndoEntry::LabelAdded { id, label } => {
            graph.remove_label(id, &label)?;
        }
        UndoEntry::LabelRemoved { id, label } => {
            graph.add_label(id, &label)?;
        }
    }
    Ok(())
}

// ============================================================================
// GraphWriter
// ============================================================================

/// Mutation access to a writer's working snapshot. Each call applies the
/// change and logs its inverse.
pub struct GraphWriter<'a> {
    graph: &'a mut GraphSnapshot,
    log: &'a mut WriteSet,
    ids: &'a IdAllocator,
}

impl<'a> GraphWriter<'a> {
    pub fn new(graph: &'a mut GraphSnapshot, log: &'a mut WriteSet, ids: &'a IdAllocator) -> Self {
        Self { graph, log, ids }
    }

    /// Read access to the working snapshot, including pending writes.
    pub fn view(&self) -> &GraphSnapshot {
        self.graph
    }

    pub fn create_node(&mut self, labels: &[&str], properties: PropertyMap) -> NodeId {
        let id = self.ids.node();
        let mut set = LabelSet::new();
        for label in labels {
            if !set.iter().any(|l| l == label) {
                set.push(label.to_string());
            }
        }
        let properties: PropertyMap = properties.into_iter().filter(|(_, v)| !v.is_null()).collect();
        self.graph.insert_node(id, set, &properties);
        self.log.push(UndoEntry::NodeCreated(id));
        id
    }

    pub fn create_edge(
        &mut self,
        src: NodeId,
        dst: NodeId,
        edge_type: &str,
        properties: PropertyMap,
    ) -> Result<EdgeId> {
        let id = self.ids.edge();
        let properties: PropertyMap = properties.into_iter().filter(|(_, v)| !v.is_null()).collect();
        self.graph.insert_edge(id, src, dst, edge_type, &properties)?;
        self.log.push(UndoEntry::EdgeCreated(id));
        Ok(id)
    }

    /// Sets (or with `Null`, removes) a node property.
    pub fn set_node_property(&mut self, id: NodeId, key: &str, value: Value) -> Result<()> {
        let previous = self.graph.set_node_property(id, key, value)?;
        self.log.push(UndoEntry::NodePropertySet { id, key: key.to_string(), previous });
        Ok(())
    }

    pub fn set_edge_property(&mut self, id: EdgeId, key: &str, value: Value) -> Result<()> {
        let previous = self.graph.set_edge_property(id, key, value)?;
        self.log.push(UndoEntry::EdgePropertySet { id, key: key.to_string(), previous });
        Ok(())
    }

    /// Returns whether the label was newly added.
    pub fn add_label(&mut self, id: NodeId, label: &str) -> Result<bool> {
        let added = self.graph.add_label(id, label)?;
        if added {
            self.log.push(UndoEntry::LabelAdded { id, label: label.to_string() });
        }
        Ok(added)
    }

    /// Returns whether the label was present.
    pub fn remove_label(&mut self, id: NodeId, label: &str) -> Result<bool> {
        let removed = self.graph.remove_label(id, label)?;
        if removed {
            self.log.push(UndoEntry::LabelRemoved { id, label: label.to_string() });
        }
        Ok(removed)
    }

    /// Deletes an edge. Returns false if it was already gone.
    pub fn delete_edge(&mut self, id: EdgeId) -> bool {
        match self.graph.remove_edge(id) {
            Some(deleted) => {
                self.log.push(UndoEntry::EdgeDeleted(deleted));
                true
            }
            None => false,
        }
    }

    /// Deletes a node. With `detach`, incident edges go first; without it a
    /// connected node is a constraint violation. Returns the number of
    /// edges removed, or `None` if the node was already gone.
    pub fn delete_node(&mut self, id: NodeId, detach: bool) -> Result<Option<usize>> {
        if !self.graph.contains_node(id) {
            return Ok(None);
        }
        let mut removed = 0;
        if detach {
            for edge in self.graph.incident_edges(id) {
                if self.delete_edge(edge) {
                    removed += 1;
                }
            }
        }
        let (labels, properties) = self.graph.remove_node(id)?;
        self.log.push(UndoEntry::NodeDeleted { id, labels, properties });
        Ok(Some(removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, RuntimeError};

    #[test]
    fn test_rollback_to_savepoint() {
        let mut graph = GraphSnapshot::empty(8);
        let mut log = WriteSet::new();
        let ids = IdAllocator::new();

        let mut w = GraphWriter::new(&mut graph, &mut log, &ids);
        let a = w.create_node(&["Person"], props([("name", "Alice")]));
        let sp = w.log.savepoint();
        let b = w.create_node(&["Person"], PropertyMap::new());
        w.create_edge(a, b, "KNOWS", PropertyMap::new()).unwrap();
        w.set_node_property(a, "name", Value::from("Ann")).unwrap();
        w.add_label(a, "Admin").unwrap();

        log.rollback_to(sp, &mut graph);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.node_property(a, "name"), Some(&Value::from("Alice")));
        assert!(!graph.has_label(a, "Admin"));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_detach_delete_restored_by_undo() {
        let mut graph = GraphSnapshot::empty(8);
        let mut log = WriteSet::new();
        let ids = IdAllocator::new();

        let mut w = GraphWriter::new(&mut graph, &mut log, &ids);
        let a = w.create_node(&["Person"], props([("age", 30)]));
        let b = w.create_node(&["Person"], PropertyMap::new());
        let e = w.create_edge(a, b, "KNOWS", props([("w", 2.5)])).unwrap();

        let sp = w.log.savepoint();
        assert!(matches!(
            w.delete_node(a, false),
            Err(Error::Runtime(RuntimeError::ConstraintViolation(_)))
        ));
        assert_eq!(w.delete_node(a, true).unwrap(), Some(1));

        log.rollback_to(sp, &mut graph);
        assert_eq!(graph.node_property(a, "age"), Some(&Value::Int(30)));
        assert_eq!(graph.edge_property(e, "w"), Some(&Value::Float(2.5)));
        assert_eq!(graph.degree(a, Direction::Outgoing), 1);
    }

    #[test]
    fn test_ids_not_reused_after_undo() {
        let mut graph = GraphSnapshot::empty(8);
        let mut log = WriteSet::new();
        let ids = IdAllocator::new();

        let first = GraphWriter::new(&mut graph, &mut log, &ids).create_node(&[], PropertyMap::new());
        log.rollback_to(Savepoint(0), &mut graph);
        let second = GraphWriter::new(&mut graph, &mut log, &ids).create_node(&[], PropertyMap::new());
        assert!(second > first);
    }
}
