//! Per-execution state shared by every operator of a pipeline.

use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::model::PropertyMap;
use crate::storage::GraphSnapshot;
use crate::{Error, Result};

/// Cooperative cancellation flag. Clones share the flag, so a token can be
/// handed to another thread and cancelled from there.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// `Err(Error::Cancelled)` once cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// The graph view, parameters and counters one pipeline runs against.
pub struct ExecContext<'a> {
    pub graph: &'a GraphSnapshot,
    pub params: &'a PropertyMap,
    pub cancel: &'a CancellationToken,
    pub rows_scanned: Cell<u64>,
    pub chunks_skipped: Cell<u64>,
}

impl<'a> ExecContext<'a> {
    pub fn new(graph: &'a GraphSnapshot, params: &'a PropertyMap, cancel: &'a CancellationToken) -> Self {
        Self {
            graph,
            params,
            cancel,
            rows_scanned: Cell::new(0),
            chunks_skipped: Cell::new(0),
        }
    }

    pub fn check_cancelled(&self) -> Result<()> {
        self.cancel.check()
    }

    pub(crate) fn add_scanned(&self, rows: u64, chunks_skipped: u64) {
        self.rows_scanned.set(self.rows_scanned.get() + rows);
        self.chunks_skipped.set(self.chunks_skipped.get() + chunks_skipped);
    }
}
