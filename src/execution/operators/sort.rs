//! Result shaping: DISTINCT, ORDER BY, SKIP and LIMIT.

use std::cmp::Ordering;

use hashbrown::HashSet;

use crate::execution::context::ExecContext;
use crate::execution::eval::Evaluator;
use crate::execution::row::{FRow, Row};
use crate::model::{GroupKey, Value};
use crate::pattern::Expr;
use crate::planner::{Layout, SortKey};
use crate::Result;

use super::{window_count, BoxedOperator, Operator};

/// Drops rows whose `slots` repeat an earlier row's.
pub struct DistinctOperator<'a> {
    input: BoxedOperator<'a>,
    slots: &'a [usize],
    seen: HashSet<GroupKey>,
}

impl<'a> DistinctOperator<'a> {
    pub fn new(input: BoxedOperator<'a>, slots: &'a [usize]) -> Self {
        Self { input, slots, seen: HashSet::new() }
    }
}

impl<'a> Operator<'a> for DistinctOperator<'a> {
    fn next(&mut self, ctx: &ExecContext<'a>) -> Result<Option<FRow>> {
        while let Some(row) = self.input.next(ctx)? {
            let key = GroupKey(self.slots.iter().map(|&s| row.prefix[s].to_value()).collect());
            if self.seen.insert(key) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "Distinct"
    }
}

/// Stable sort on the key expressions.
pub struct SortOperator<'a> {
    input: BoxedOperator<'a>,
    keys: &'a [SortKey],
    layout: &'a Layout,
    sorted: Option<std::vec::IntoIter<Row>>,
}

impl<'a> SortOperator<'a> {
    pub fn new(input: BoxedOperator<'a>, keys: &'a [SortKey], layout: &'a Layout) -> Self {
        Self { input, keys, layout, sorted: None }
    }

    fn sort(&mut self, ctx: &ExecContext<'a>) -> Result<Vec<Row>> {
        let eval = Evaluator::new(ctx, self.layout);
        let mut keyed: Vec<(Vec<Value>, Row)> = Vec::new();
        while let Some(row) = self.input.next(ctx)? {
            ctx.check_cancelled()?;
            let values = self.keys.iter().map(|k| eval.eval(&k.expr, &row.prefix)).collect::<Result<Vec<_>>>()?;
            keyed.push((values, row.prefix));
        }
        let keys = self.keys;
        keyed.sort_by(|(a, _), (b, _)| {
            for (key, (x, y)) in keys.iter().zip(a.iter().zip(b)) {
                let ord = compare_key(key, x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }
}

/// Nulls go first or last regardless of direction.
fn compare_key(key: &SortKey, x: &Value, y: &Value) -> Ordering {
    match (x.is_null(), y.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) if key.nulls_first => Ordering::Less,
        (true, false) => Ordering::Greater,
        (false, true) if key.nulls_first => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) if key.ascending => x.sort_cmp(y),
        (false, false) => y.sort_cmp(x),
    }
}

impl<'a> Operator<'a> for SortOperator<'a> {
    fn next(&mut self, ctx: &ExecContext<'a>) -> Result<Option<FRow>> {
        if self.sorted.is_none() {
            let rows = self.sort(ctx)?;
            self.sorted = Some(rows.into_iter());
        }
        Ok(self.sorted.as_mut().and_then(Iterator::next).map(FRow::flat))
    }

    fn name(&self) -> &'static str {
        "Sort"
    }
}

pub struct SkipOperator<'a> {
    input: BoxedOperator<'a>,
    count: &'a Expr,
    remaining: Option<u64>,
}

impl<'a> SkipOperator<'a> {
    pub fn new(input: BoxedOperator<'a>, count: &'a Expr) -> Self {
        Self { input, count, remaining: None }
    }
}

impl<'a> Operator<'a> for SkipOperator<'a> {
    fn next(&mut self, ctx: &ExecContext<'a>) -> Result<Option<FRow>> {
        let mut remaining = match self.remaining {
            Some(n) => n,
            None => window_count(ctx, self.count, "SKIP")?,
        };
        while remaining > 0 {
            if self.input.next(ctx)?.is_none() {
                self.remaining = Some(0);
                return Ok(None);
            }
            remaining -= 1;
        }
        self.remaining = Some(0);
        self.input.next(ctx)
    }

    fn name(&self) -> &'static str {
        "Skip"
    }
}

/// Stops pulling from its input once `count` rows were returned.
pub struct LimitOperator<'a> {
    input: BoxedOperator<'a>,
    count: &'a Expr,
    remaining: Option<u64>,
}

impl<'a> LimitOperator<'a> {
    pub fn new(input: BoxedOperator<'a>, count: &'a Expr) -> Self {
        Self { input, count, remaining: None }
    }
}

impl<'a> Operator<'a> for LimitOperator<'a> {
    fn next(&mut self, ctx: &ExecContext<'a>) -> Result<Option<FRow>> {
        let remaining = match self.remaining {
            Some(n) => n,
            None => window_count(ctx, self.count, "LIMIT")?,
        };
        if remaining == 0 {
            self.remaining = Some(0);
            return Ok(None);
        }
        let row = self.input.next(ctx)?;
        self.remaining = Some(if row.is_some() { remaining - 1 } else { 0 });
        Ok(row)
    }

    fn name(&self) -> &'static str {
        "Limit"
    }
}
