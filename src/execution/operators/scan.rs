//! Node scan with zone-map pruning.

use tracing::trace;

use crate::execution::context::ExecContext;
use crate::execution::row::{empty_row, FRow, Slot};
use crate::model::NodeId;
use crate::planner::ScanSpec;
use crate::storage::{GraphSnapshot, ScanIter, ScanPredicate};
use crate::Result;

use super::Operator;

enum Source<'a> {
    /// Labeled scan through the property store.
    Table(ScanIter<'a, NodeId>),
    /// Every node, in id order.
    All(std::vec::IntoIter<NodeId>),
}

/// Yields one row per node in the scanned table that satisfies the pushed
/// predicates and carries every extra label.
pub struct ScanOperator<'a> {
    graph: &'a GraphSnapshot,
    spec: &'a ScanSpec,
    source: Source<'a>,
    width: usize,
    reported_rows: u64,
    reported_skips: u64,
}

impl<'a> ScanOperator<'a> {
    pub fn new(graph: &'a GraphSnapshot, spec: &'a ScanSpec, predicates: &'a [ScanPredicate], width: usize) -> Self {
        let source = match spec.labels.first() {
            Some(label) => Source::Table(graph.scan_nodes(label, predicates)),
            None => Source::All(graph.node_ids().into_iter()),
        };
        Self { graph, spec, source, width, reported_rows: 0, reported_skips: 0 }
    }

    fn report(&mut self, ctx: &ExecContext<'a>) {
        if let Source::Table(iter) = &self.source {
            ctx.add_scanned(iter.rows_examined - self.reported_rows, iter.chunks_skipped - self.reported_skips);
            self.reported_rows = iter.rows_examined;
            self.reported_skips = iter.chunks_skipped;
        }
    }
}

impl<'a> Operator<'a> for ScanOperator<'a> {
    fn next(&mut self, ctx: &ExecContext<'a>) -> Result<Option<FRow>> {
        loop {
            ctx.check_cancelled()?;
            let next = match &mut self.source {
                Source::Table(iter) => iter.next().transpose()?,
                Source::All(iter) => {
                    let id = iter.next();
                    if id.is_some() {
                        ctx.add_scanned(1, 0);
                    }
                    id
                }
            };
            self.report(ctx);
            let Some(id) = next else {
                if let Source::Table(iter) = &self.source {
                    trace!(
                        label = ?self.spec.labels.first(),
                        rows = iter.rows_examined,
                        chunks_skipped = iter.chunks_skipped,
                        "scan finished"
                    );
                }
                return Ok(None);
            };
            if self.spec.labels.iter().skip(1).all(|l| self.graph.has_label(id, l)) {
                let mut row = empty_row(self.width);
                row[self.spec.slot] = Slot::Node(id);
                return Ok(Some(FRow::flat(row)));
            }
        }
    }

    fn name(&self) -> &'static str {
        "NodeScan"
    }
}
