//! Grouping and aggregation.
//!
//! The operator is blocking: the first pull drains the input. Factorized
//! input is walked only down to the depth the keys and arguments need,
//! and each partial binding counts as many rows as it stands for. A
//! `count(*)` over a deferred hop therefore never materializes the hop.

use hashbrown::{HashMap, HashSet};
use tracing::debug;

use crate::execution::context::ExecContext;
use crate::execution::eval::Evaluator;
use crate::execution::row::{empty_row, FRow, Row, Slot};
use crate::model::{GroupKey, Value};
use crate::planner::{AggFunc, AggSpec, FactorLevel, GroupingKey, Layout};
use crate::{Result, RuntimeError};

use super::{BoxedOperator, Operator};

enum Acc {
    Count(u64),
    Sum(Value),
    Avg { sum: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    Collect(Vec<Value>),
}

struct AggState {
    acc: Acc,
    /// Values seen so far, for DISTINCT.
    seen: Option<HashSet<GroupKey>>,
}

impl AggState {
    fn new(spec: &AggSpec) -> Self {
        let acc = match spec.func {
            AggFunc::Count | AggFunc::CountRows => Acc::Count(0),
            AggFunc::Sum => Acc::Sum(Value::Int(0)),
            AggFunc::Avg => Acc::Avg { sum: 0.0, count: 0 },
            AggFunc::Min => Acc::Min(None),
            AggFunc::Max => Acc::Max(None),
            AggFunc::Collect => Acc::Collect(Vec::new()),
        };
        let seen = (spec.distinct && spec.func != AggFunc::CountRows).then(HashSet::new);
        Self { acc, seen }
    }

    /// Adds `value`, seen `m` times. `None` is a row without an argument.
    fn update(&mut self, value: Option<Value>, mut m: u64) -> Result<()> {
        let value = match value {
            None => {
                if let Acc::Count(n) = &mut self.acc {
                    *n = n.saturating_add(m);
                }
                return Ok(());
            }
            Some(Value::Null) => return Ok(()),
            Some(v) => v,
        };
        if let Some(seen) = &mut self.seen {
            if !seen.insert(GroupKey(vec![value.clone()])) {
                return Ok(());
            }
            m = 1;
        }
        match &mut self.acc {
            Acc::Count(n) => *n = n.saturating_add(m),
            Acc::Sum(total) => *total = add_times(total, &value, m)?,
            Acc::Avg { sum, count } => {
                let x = value.as_float().ok_or_else(|| not_numeric("avg", &value))?;
                *sum += x * m as f64;
                *count += m;
            }
            Acc::Min(best) => {
                if best.as_ref().is_none_or(|b| value.sort_cmp(b).is_lt()) {
                    *best = Some(value);
                }
            }
            Acc::Max(best) => {
                if best.as_ref().is_none_or(|b| value.sort_cmp(b).is_gt()) {
                    *best = Some(value);
                }
            }
            Acc::Collect(items) => {
                for _ in 0..m {
                    items.push(value.clone());
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self.acc {
            Acc::Count(n) => Value::Int(i64::try_from(n).unwrap_or(i64::MAX)),
            Acc::Sum(total) => total,
            Acc::Avg { count: 0, .. } => Value::Null,
            Acc::Avg { sum, count } => Value::Float(sum / count as f64),
            Acc::Min(v) | Acc::Max(v) => v.unwrap_or(Value::Null),
            Acc::Collect(items) => Value::List(items),
        }
    }
}

fn not_numeric(func: &str, got: &Value) -> RuntimeError {
    RuntimeError::TypeMismatch {
        context: format!("{func}()"),
        expected: "number".into(),
        got: got.type_name().into(),
    }
}

/// `total + value * m`, in integers while both sides are integers.
fn add_times(total: &Value, value: &Value, m: u64) -> Result<Value> {
    let overflow = || RuntimeError::Overflow("sum()".into());
    Ok(match (total, value) {
        (Value::Int(t), Value::Int(v)) => {
            let times = i64::try_from(m).map_err(|_| overflow())?;
            let product = v.checked_mul(times).ok_or_else(overflow)?;
            Value::Int(t.checked_add(product).ok_or_else(overflow)?)
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let t = total.as_float().unwrap_or_default();
            let v = value.as_float().unwrap_or_default();
            Value::Float(t + v * m as f64)
        }
        _ => return Err(not_numeric("sum", value).into()),
    })
}

struct Group {
    keys: Vec<Value>,
    /// Slot of each bare-variable key, from the first row of the group.
    bindings: Vec<Slot>,
    states: Vec<AggState>,
}

pub struct AggregateOperator<'a> {
    input: BoxedOperator<'a>,
    keys: &'a [GroupingKey],
    aggregates: &'a [AggSpec],
    layout: &'a Layout,
    levels: &'a [FactorLevel],
    depth: usize,
    width: usize,
    output: Option<std::vec::IntoIter<Row>>,
}

impl<'a> AggregateOperator<'a> {
    pub fn new(
        input: BoxedOperator<'a>,
        keys: &'a [GroupingKey],
        aggregates: &'a [AggSpec],
        layout: &'a Layout,
        levels: &'a [FactorLevel],
        depth: usize,
        width: usize,
    ) -> Self {
        Self { input, keys, aggregates, layout, levels, depth, width, output: None }
    }

    fn consume(&mut self, ctx: &ExecContext<'a>) -> Result<Vec<Row>> {
        let eval = Evaluator::new(ctx, self.layout);
        let (keys, aggregates) = (self.keys, self.aggregates);
        let mut index: HashMap<GroupKey, usize> = HashMap::new();
        let mut groups: Vec<Group> = Vec::new();
        let mut inputs = 0u64;

        while let Some(row) = self.input.next(ctx)? {
            ctx.check_cancelled()?;
            inputs += 1;
            row.walk(self.levels, self.depth, &mut |binding, m| {
                if m == 0 {
                    return Ok(());
                }
                let key_values = keys.iter().map(|k| eval.eval(&k.expr, binding)).collect::<Result<Vec<_>>>()?;
                let key = GroupKey(key_values);
                let position = match index.get(&key) {
                    Some(&i) => i,
                    None => {
                        groups.push(Group {
                            keys: key.0.clone(),
                            bindings: keys
                                .iter()
                                .map(|k| k.variable_slot.map_or(Slot::Empty, |s| binding[s].clone()))
                                .collect(),
                            states: aggregates.iter().map(AggState::new).collect(),
                        });
                        index.insert(key, groups.len() - 1);
                        groups.len() - 1
                    }
                };
                let group = &mut groups[position];
                for (spec, state) in aggregates.iter().zip(&mut group.states) {
                    let value = match (&spec.arg, spec.func) {
                        (_, AggFunc::CountRows) | (None, _) => None,
                        (Some(arg), _) => Some(eval.eval(arg, binding)?),
                    };
                    state.update(value, m)?;
                }
                Ok(())
            })?;
        }

        if groups.is_empty() && keys.is_empty() {
            groups.push(Group {
                keys: Vec::new(),
                bindings: Vec::new(),
                states: aggregates.iter().map(AggState::new).collect(),
            });
        }
        debug!(inputs, groups = groups.len(), depth = self.depth, "aggregation finished");

        let mut rows = Vec::with_capacity(groups.len());
        for group in groups {
            let mut row = empty_row(self.width);
            for ((key, value), binding) in keys.iter().zip(group.keys).zip(group.bindings) {
                row[key.slot] = Slot::Value(value);
                if let Some(slot) = key.variable_slot {
                    row[slot] = binding;
                }
            }
            for (spec, state) in aggregates.iter().zip(group.states) {
                row[spec.slot] = Slot::Value(state.finish());
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

impl<'a> Operator<'a> for AggregateOperator<'a> {
    fn next(&mut self, ctx: &ExecContext<'a>) -> Result<Option<FRow>> {
        if self.output.is_none() {
            let rows = self.consume(ctx)?;
            self.output = Some(rows.into_iter());
        }
        Ok(self.output.as_mut().and_then(Iterator::next).map(FRow::flat))
    }

    fn name(&self) -> &'static str {
        "Aggregate"
    }
}
