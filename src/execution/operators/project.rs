use std::collections::VecDeque;

use crate::execution::context::ExecContext;
use crate::execution::eval::Evaluator;
use crate::execution::row::{FRow, Row, Slot};
use crate::model::Value;
use crate::pattern::Expr;
use crate::planner::Layout;
use crate::Result;

use super::{BoxedOperator, Operator};

/// Evaluates each item into its output slot. Input rows are flat.
pub struct ProjectOperator<'a> {
    input: BoxedOperator<'a>,
    items: &'a [(usize, Expr)],
    layout: &'a Layout,
}

impl<'a> ProjectOperator<'a> {
    pub fn new(input: BoxedOperator<'a>, items: &'a [(usize, Expr)], layout: &'a Layout) -> Self {
        Self { input, items, layout }
    }
}

impl<'a> Operator<'a> for ProjectOperator<'a> {
    fn next(&mut self, ctx: &ExecContext<'a>) -> Result<Option<FRow>> {
        let Some(mut row) = self.input.next(ctx)? else { return Ok(None) };
        let eval = Evaluator::new(ctx, self.layout);
        // Items read the input bindings, never each other's outputs.
        let values = self
            .items
            .iter()
            .map(|(_, expr)| eval.eval(expr, &row.prefix))
            .collect::<Result<Vec<_>>>()?;
        for ((slot, _), value) in self.items.iter().zip(values) {
            row.prefix[*slot] = Slot::Value(value);
        }
        Ok(Some(row))
    }

    fn name(&self) -> &'static str {
        "Project"
    }
}

/// Binds each element of a list to `slot`, one row per element. A null
/// produces no rows and any other value a single row.
pub struct UnwindOperator<'a> {
    input: BoxedOperator<'a>,
    expr: &'a Expr,
    slot: usize,
    layout: &'a Layout,
    buffer: VecDeque<Row>,
}

impl<'a> UnwindOperator<'a> {
    pub fn new(input: BoxedOperator<'a>, expr: &'a Expr, slot: usize, layout: &'a Layout) -> Self {
        Self { input, expr, slot, layout, buffer: VecDeque::new() }
    }
}

impl<'a> Operator<'a> for UnwindOperator<'a> {
    fn next(&mut self, ctx: &ExecContext<'a>) -> Result<Option<FRow>> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(FRow::flat(row)));
            }
            ctx.check_cancelled()?;
            let Some(input) = self.input.next(ctx)? else { return Ok(None) };
            let items = match Evaluator::new(ctx, self.layout).eval(self.expr, &input.prefix)? {
                Value::List(items) => items,
                Value::Null => Vec::new(),
                other => vec![other],
            };
            for item in items {
                let mut row = input.prefix.clone();
                row[self.slot] = Slot::Value(item);
                self.buffer.push_back(row);
            }
        }
    }

    fn name(&self) -> &'static str {
        "Unwind"
    }
}
