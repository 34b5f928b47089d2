//! Leaf and combining operators.

use std::collections::VecDeque;

use crate::execution::context::ExecContext;
use crate::execution::row::{empty_row, FRow, Row, Slot};
use crate::planner::PlanOp;
use crate::storage::GraphSnapshot;
use crate::Result;

use super::{BoxedOperator, Operator, ResolvedScans};

/// Produces one empty row. Statements without a MATCH start here.
pub struct ArgumentOperator {
    width: usize,
    done: bool,
}

impl ArgumentOperator {
    pub fn new(width: usize) -> Self {
        Self { width, done: false }
    }
}

impl<'a> Operator<'a> for ArgumentOperator {
    fn next(&mut self, _ctx: &ExecContext<'a>) -> Result<Option<FRow>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        Ok(Some(FRow::flat(empty_row(self.width))))
    }

    fn name(&self) -> &'static str {
        "Argument"
    }
}

/// Replays rows produced before the pipeline was built.
pub struct RowsOperator {
    rows: std::vec::IntoIter<Row>,
}

impl RowsOperator {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows: rows.into_iter() }
    }
}

impl<'a> Operator<'a> for RowsOperator {
    fn next(&mut self, _ctx: &ExecContext<'a>) -> Result<Option<FRow>> {
        Ok(self.rows.next().map(FRow::flat))
    }

    fn name(&self) -> &'static str {
        "Rows"
    }
}

/// Combines every left row with every right row. Both sides are flat and
/// bind disjoint slots.
pub struct CrossProductOperator<'a> {
    left: BoxedOperator<'a>,
    right: BoxedOperator<'a>,
    right_rows: Option<Vec<Row>>,
    current: Option<Row>,
    position: usize,
}

impl<'a> CrossProductOperator<'a> {
    pub fn new(left: BoxedOperator<'a>, right: BoxedOperator<'a>) -> Self {
        Self { left, right, right_rows: None, current: None, position: 0 }
    }
}

impl<'a> Operator<'a> for CrossProductOperator<'a> {
    fn next(&mut self, ctx: &ExecContext<'a>) -> Result<Option<FRow>> {
        if self.right_rows.is_none() {
            let mut rows = Vec::new();
            while let Some(row) = self.right.next(ctx)? {
                rows.push(row.prefix);
            }
            self.right_rows = Some(rows);
        }
        let right_rows = self.right_rows.as_deref().unwrap_or_default();
        if right_rows.is_empty() {
            return Ok(None);
        }
        loop {
            if let Some(left) = &self.current {
                if let Some(right) = right_rows.get(self.position) {
                    self.position += 1;
                    let mut row = left.clone();
                    for (slot, value) in row.iter_mut().zip(right) {
                        if *value != Slot::Empty {
                            *slot = value.clone();
                        }
                    }
                    return Ok(Some(FRow::flat(row)));
                }
            }
            ctx.check_cancelled()?;
            match self.left.next(ctx)? {
                Some(row) => {
                    self.current = Some(row.prefix);
                    self.position = 0;
                }
                None => return Ok(None),
            }
        }
    }

    fn name(&self) -> &'static str {
        "CrossProduct"
    }
}

/// Left-outer join. `inner` is built once per input row, over that row
/// alone; when it yields nothing the input row passes through with the
/// inner slots still empty.
pub struct OptionalOperator<'a> {
    input: BoxedOperator<'a>,
    inner: &'a PlanOp,
    graph: &'a GraphSnapshot,
    scans: &'a ResolvedScans,
    width: usize,
    buffer: VecDeque<Row>,
}

impl<'a> OptionalOperator<'a> {
    pub fn new(
        input: BoxedOperator<'a>,
        inner: &'a PlanOp,
        graph: &'a GraphSnapshot,
        scans: &'a ResolvedScans,
        width: usize,
    ) -> Self {
        Self { input, inner, graph, scans, width, buffer: VecDeque::new() }
    }
}

impl<'a> Operator<'a> for OptionalOperator<'a> {
    fn next(&mut self, ctx: &ExecContext<'a>) -> Result<Option<FRow>> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(FRow::flat(row)));
            }
            ctx.check_cancelled()?;
            let Some(outer) = self.input.next(ctx)? else { return Ok(None) };
            let mut prepared = Some(vec![outer.prefix.clone()]);
            let mut inner = super::build(self.inner, self.graph, self.scans, self.width, &mut prepared)?;
            while let Some(row) = inner.next(ctx)? {
                self.buffer.push_back(row.prefix);
            }
            if self.buffer.is_empty() {
                return Ok(Some(outer));
            }
        }
    }

    fn name(&self) -> &'static str {
        "Optional"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::CancellationToken;
    use crate::model::{NodeId, PropertyMap};
    use crate::storage::GraphSnapshot;

    fn rows(slot: usize, ids: &[u64]) -> Vec<Row> {
        ids.iter()
            .map(|&id| {
                let mut row = empty_row(2);
                row[slot] = Slot::Node(NodeId(id));
                row
            })
            .collect()
    }

    #[test]
    fn test_cross_product_pairs_every_row() {
        let g = GraphSnapshot::empty(8);
        let params = PropertyMap::new();
        let cancel = CancellationToken::new();
        let ctx = ExecContext::new(&g, &params, &cancel);

        let mut op = CrossProductOperator::new(
            Box::new(RowsOperator::new(rows(0, &[1, 2]))),
            Box::new(RowsOperator::new(rows(1, &[7, 8, 9]))),
        );
        let mut pairs = Vec::new();
        while let Some(row) = op.next(&ctx).unwrap() {
            pairs.push((row.prefix[0].as_node().unwrap().0, row.prefix[1].as_node().unwrap().0));
        }
        assert_eq!(pairs, vec![(1, 7), (1, 8), (1, 9), (2, 7), (2, 8), (2, 9)]);
    }

    #[test]
    fn test_cross_product_with_empty_side() {
        let g = GraphSnapshot::empty(8);
        let params = PropertyMap::new();
        let cancel = CancellationToken::new();
        let ctx = ExecContext::new(&g, &params, &cancel);

        let mut op = CrossProductOperator::new(
            Box::new(RowsOperator::new(rows(0, &[1, 2]))),
            Box::new(RowsOperator::new(Vec::new())),
        );
        assert!(op.next(&ctx).unwrap().is_none());
    }
}
