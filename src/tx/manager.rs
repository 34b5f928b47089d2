//! Transaction manager: the committed-snapshot pointer and the writer slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::storage::GraphSnapshot;
use crate::{Result, TransactionError};
use super::write_set::IdAllocator;
use super::TxId;

/// Publishes committed versions and serializes writers.
///
/// Readers clone the current `Arc<GraphSnapshot>` and never block behind
/// a writer. At most one transaction holds the writer slot at a time.
#[derive(Debug)]
pub struct TxManager {
    committed: RwLock<Arc<GraphSnapshot>>,
    writer: Mutex<Option<TxId>>,
    next_tx: AtomicU64,
    ids: IdAllocator,
}

impl TxManager {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            committed: RwLock::new(Arc::new(GraphSnapshot::empty(chunk_size))),
            writer: Mutex::new(None),
            next_tx: AtomicU64::new(1),
            ids: IdAllocator::new(),
        }
    }

    /// The latest committed snapshot.
    pub fn latest(&self) -> Arc<GraphSnapshot> {
        Arc::clone(&self.committed.read())
    }

    pub fn next_tx_id(&self) -> TxId {
        TxId(self.next_tx.fetch_add(1, Ordering::Relaxed))
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    /// Current holder of the writer slot.
    pub fn active_writer(&self) -> Option<TxId> {
        *self.writer.lock()
    }

    /// Claims the writer slot for `tx` and hands back a private working
    /// copy of the latest committed snapshot.
    pub fn acquire_writer(&self, tx: TxId) -> Result<GraphSnapshot> {
        let mut slot = self.writer.lock();
        match *slot {
            Some(holder) if holder != tx => {
                return Err(TransactionError::WriteConflict { holder: holder.0, requested: tx.0 }.into());
            }
            _ => *slot = Some(tx),
        }
        let working = GraphSnapshot::clone(&self.committed.read());
        debug!(tx = tx.0, base_version = working.version(), "writer slot acquired");
        Ok(working)
    }

    /// Publishes a writer's working copy as the next version and frees the
    /// writer slot. Returns the new version number.
    pub fn publish(&self, tx: TxId, mut working: GraphSnapshot) -> u64 {
        let version = {
            let mut committed = self.committed.write();
            let version = committed.version() + 1;
            working.set_version(version);
            *committed = Arc::new(working);
            version
        };
        self.release_writer(tx);
        version
    }

    pub fn release_writer(&self, tx: TxId) {
        let mut slot = self.writer.lock();
        if *slot == Some(tx) {
            *slot = None;
            debug!(tx = tx.0, "writer slot released");
        }
    }
}
