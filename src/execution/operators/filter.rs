//! Predicate filtering and factor-group flattening.

use std::collections::VecDeque;

use crate::execution::context::ExecContext;
use crate::execution::eval::Evaluator;
use crate::execution::row::{FRow, Row};
use crate::pattern::Expr;
use crate::planner::{FactorLevel, Layout};
use crate::Result;

use super::{BoxedOperator, Operator};

/// Keeps bindings for which the predicate is true. On a factorized row
/// the predicate is applied at `depth`, pruning group entries instead of
/// whole rows.
pub struct FilterOperator<'a> {
    input: BoxedOperator<'a>,
    predicate: &'a Expr,
    layout: &'a Layout,
    levels: &'a [FactorLevel],
    depth: usize,
}

impl<'a> FilterOperator<'a> {
    pub fn new(
        input: BoxedOperator<'a>,
        predicate: &'a Expr,
        layout: &'a Layout,
        levels: &'a [FactorLevel],
        depth: usize,
    ) -> Self {
        Self { input, predicate, layout, levels, depth }
    }
}

impl<'a> Operator<'a> for FilterOperator<'a> {
    fn next(&mut self, ctx: &ExecContext<'a>) -> Result<Option<FRow>> {
        let eval = Evaluator::new(ctx, self.layout);
        while let Some(mut row) = self.input.next(ctx)? {
            let predicate = self.predicate;
            if row.retain(self.levels, self.depth, &mut |r| eval.truth(predicate, r))? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "Filter"
    }
}

/// Emits one flat row per binding a factorized row stands for.
pub struct FlattenOperator<'a> {
    input: BoxedOperator<'a>,
    levels: &'a [FactorLevel],
    buffer: VecDeque<Row>,
}

impl<'a> FlattenOperator<'a> {
    pub fn new(input: BoxedOperator<'a>, levels: &'a [FactorLevel]) -> Self {
        Self { input, levels, buffer: VecDeque::new() }
    }
}

impl<'a> Operator<'a> for FlattenOperator<'a> {
    fn next(&mut self, ctx: &ExecContext<'a>) -> Result<Option<FRow>> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(FRow::flat(row)));
            }
            ctx.check_cancelled()?;
            let Some(row) = self.input.next(ctx)? else { return Ok(None) };
            let mut rows = Vec::new();
            row.flatten(self.levels, &mut rows)?;
            self.buffer.extend(rows);
        }
    }

    fn name(&self) -> &'static str {
        "Flatten"
    }
}
