//! Transaction management.
//!
//! A [`Transaction`] reads from the snapshot that was current when it
//! began. Its first write claims the single writer slot and gives it a
//! private working copy; every later read through the handle sees that
//! copy, pending writes included. Commit publishes the working copy as the
//! next version; rollback throws it away.

pub mod manager;
pub mod write_set;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::execution::{self, CancellationToken, GraphAccess, QueryResult};
use crate::model::*;
use crate::pattern::Statement;
use crate::planner;
use crate::storage::GraphSnapshot;
use crate::{GraphInner, Result, TransactionError};

pub use manager::TxManager;
pub use write_set::{GraphWriter, IdAllocator, Savepoint, WriteSet};

/// Transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

/// Opaque transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub u64);

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state. Only `Active` accepts operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

/// A transaction handle.
///
/// Dropping a still-active handle commits it, unless the thread is
/// unwinding from a panic, in which case it rolls back. Use
/// [`Graph::transaction`](crate::Graph::transaction) to roll back on an
/// `Err` as well.
pub struct Transaction {
    id: TxId,
    mode: TxMode,
    state: TxState,
    inner: Arc<GraphInner>,
    base: Arc<GraphSnapshot>,
    working: Option<GraphSnapshot>,
    write_set: WriteSet,
}

impl Transaction {
    pub(crate) fn begin(inner: Arc<GraphInner>, mode: TxMode) -> Self {
        let id = inner.manager.next_tx_id();
        let base = inner.manager.latest();
        debug!(tx = id.0, ?mode, version = base.version(), "transaction started");
        Self {
            id,
            mode,
            state: TxState::Active,
            inner,
            base,
            working: None,
            write_set: WriteSet::new(),
        }
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn mode(&self) -> TxMode {
        self.mode
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
    }

    /// Whether this transaction holds the writer slot.
    pub fn is_writer(&self) -> bool {
        self.working.is_some()
    }

    /// The graph as this transaction sees it.
    pub fn view(&self) -> &GraphSnapshot {
        self.working.as_ref().unwrap_or(&self.base)
    }

    /// Number of pending writes.
    pub fn pending_writes(&self) -> usize {
        self.write_set.len()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != TxState::Active {
            return Err(TransactionError::InvalidState { id: self.id.0, state: self.state }.into());
        }
        Ok(())
    }

    fn ensure_writer(&mut self) -> Result<()> {
        if self.mode == TxMode::ReadOnly {
            return Err(TransactionError::ReadOnly(self.id.0).into());
        }
        if self.working.is_none() {
            self.working = Some(self.inner.manager.acquire_writer(self.id)?);
        }
        Ok(())
    }

    /// Runs `f` with write access to the working copy.
    fn write<T>(&mut self, f: impl FnOnce(&mut GraphWriter<'_>) -> Result<T>) -> Result<T> {
        self.ensure_active()?;
        self.ensure_writer()?;
        let Some(graph) = self.working.as_mut() else {
            return Err(TransactionError::InvalidState { id: self.id.0, state: self.state }.into());
        };
        let savepoint = self.write_set.savepoint();
        let mut writer = GraphWriter::new(graph, &mut self.write_set, self.inner.manager.ids());
        let result = f(&mut writer);
        if result.is_err() {
            self.write_set.rollback_to(savepoint, graph);
        }
        result
    }

    // ========================================================================
    // Statements
    // ========================================================================

    /// Compiles and runs one statement.
    pub fn execute(&mut self, statement: &Statement) -> Result<QueryResult> {
        self.execute_with_params(statement, &PropertyMap::new())
    }

    pub fn execute_with_params(&mut self, statement: &Statement, params: &PropertyMap) -> Result<QueryResult> {
        self.execute_cancellable(statement, params, &CancellationToken::new())
    }

    /// Runs one statement, checking `cancel` between operator pulls.
    ///
    /// A failing statement is undone; the transaction stays active.
    pub fn execute_cancellable(
        &mut self,
        statement: &Statement,
        params: &PropertyMap,
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        self.ensure_active()?;
        let started = Instant::now();
        let plan = planner::compile(statement, self.view(), &self.inner.config)?;

        let result = if plan.is_read_only() {
            execution::execute_plan(&plan, GraphAccess::Read(self.view()), params, cancel)
        } else {
            self.ensure_writer()?;
            let Some(graph) = self.working.as_mut() else {
                return Err(TransactionError::InvalidState { id: self.id.0, state: self.state }.into());
            };
            let savepoint = self.write_set.savepoint();
            let writer = GraphWriter::new(graph, &mut self.write_set, self.inner.manager.ids());
            let result = execution::execute_plan(&plan, GraphAccess::Write(writer), params, cancel);
            if let Err(e) = &result {
                warn!(tx = self.id.0, error = %e, "statement aborted, undoing its writes");
                self.write_set.rollback_to(savepoint, graph);
            }
            result
        };

        if self.inner.config.query_logging {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            match &result {
                Ok(r) => info!(tx = self.id.0, rows = r.rows.len(), elapsed_ms, "statement executed"),
                Err(e) => info!(tx = self.id.0, error = %e, elapsed_ms, "statement failed"),
            }
        }
        result
    }

    // ========================================================================
    // Direct mutations
    // ========================================================================

    pub fn create_node(&mut self, labels: &[&str], properties: PropertyMap) -> Result<Node> {
        let id = self.write(|w| Ok(w.create_node(labels, properties)))?;
        self.node(id)
    }

    pub fn create_edge(&mut self, src: NodeId, dst: NodeId, edge_type: &str, properties: PropertyMap) -> Result<Edge> {
        let id = self.write(|w| w.create_edge(src, dst, edge_type, properties))?;
        self.view()
            .edge(id)
            .ok_or_else(|| crate::Error::NotFound(format!("edge {id}")))
    }

    pub fn set_node_property(&mut self, id: NodeId, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.write(|w| w.set_node_property(id, key, value))
    }

    pub fn set_edge_property(&mut self, id: EdgeId, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.write(|w| w.set_edge_property(id, key, value))
    }

    pub fn add_label(&mut self, id: NodeId, label: &str) -> Result<bool> {
        self.write(|w| w.add_label(id, label))
    }

    pub fn remove_label(&mut self, id: NodeId, label: &str) -> Result<bool> {
        self.write(|w| w.remove_label(id, label))
    }

    /// Deletes a node; `detach` also removes its edges. Returns false if
    /// the node did not exist.
    pub fn delete_node(&mut self, id: NodeId, detach: bool) -> Result<bool> {
        self.write(|w| w.delete_node(id, detach).map(|r| r.is_some()))
    }

    pub fn delete_edge(&mut self, id: EdgeId) -> Result<bool> {
        self.write(|w| Ok(w.delete_edge(id)))
    }

    pub fn node(&self, id: NodeId) -> Result<Node> {
        self.view().node(id).ok_or_else(|| crate::Error::NotFound(format!("node {id}")))
    }

    // ========================================================================
    // Completion
    // ========================================================================

    /// Publishes pending writes. Returns the committed version.
    pub fn commit(mut self) -> Result<u64> {
        self.finish_commit()
    }

    /// Discards pending writes.
    pub fn rollback(mut self) -> Result<()> {
        self.finish_rollback()
    }

    fn finish_commit(&mut self) -> Result<u64> {
        self.ensure_active()?;
        self.state = TxState::Committed;
        let writes = self.write_set.len();
        self.write_set.clear();
        let version = match self.working.take() {
            Some(working) => self.inner.manager.publish(self.id, working),
            None => self.base.version(),
        };
        debug!(tx = self.id.0, version, writes, "transaction committed");
        Ok(version)
    }

    fn finish_rollback(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.state = TxState::RolledBack;
        let writes = self.write_set.len();
        self.write_set.clear();
        if self.working.take().is_some() {
            self.inner.manager.release_writer(self.id);
        }
        debug!(tx = self.id.0, writes, "transaction rolled back");
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state != TxState::Active {
            return;
        }
        if std::thread::panicking() {
            let _ = self.finish_rollback();
        } else if let Err(e) = self.finish_commit() {
            warn!(tx = self.id.0, error = %e, "auto-commit on drop failed");
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("base_version", &self.base.version())
            .field("pending_writes", &self.write_set.len())
            .finish()
    }
}
