//! Physical operators.
//!
//! Every operator is a pull iterator over [`FRow`]s: `next` returns the
//! next binding, `None` once exhausted. Blocking operators (aggregate,
//! sort) drain their input on the first pull.
//!
//! **Leaves:** [`ArgumentOperator`], [`ScanOperator`], [`RowsOperator`]
//! (rows prepared by a mutation phase, or the outer row of an optional
//! match).
//!
//! **Graph:** [`ExpandOperator`] (flat, variable-length, factorized and
//! deferred hops).
//!
//! **Relational:** [`FilterOperator`], [`FlattenOperator`],
//! [`CrossProductOperator`], [`OptionalOperator`], [`ProjectOperator`],
//! [`UnwindOperator`], [`AggregateOperator`],
//! [`DistinctOperator`], [`SortOperator`], [`SkipOperator`],
//! [`LimitOperator`].

mod aggregate;
mod cross;
mod expand;
mod filter;
mod project;
mod scan;
mod sort;

pub use aggregate::AggregateOperator;
pub use cross::{ArgumentOperator, CrossProductOperator, OptionalOperator, RowsOperator};
pub use expand::ExpandOperator;
pub use filter::{FilterOperator, FlattenOperator};
pub use project::{ProjectOperator, UnwindOperator};
pub use scan::ScanOperator;
pub use sort::{DistinctOperator, LimitOperator, SkipOperator, SortOperator};

use hashbrown::HashMap;

use crate::model::{PropertyMap, Value};
use crate::pattern::Expr;
use crate::planner::{Layout, PlanOp};
use crate::storage::{GraphSnapshot, ScanPredicate};
use crate::{CompileError, Result, RuntimeError};

use super::context::ExecContext;
use super::row::{FRow, Row};

/// A pull-based operator.
pub trait Operator<'a> {
    /// Pulls the next binding. Returns `None` when exhausted.
    fn next(&mut self, ctx: &ExecContext<'a>) -> Result<Option<FRow>>;

    /// Name for logs.
    fn name(&self) -> &'static str;
}

pub type BoxedOperator<'a> = Box<dyn Operator<'a> + 'a>;

/// Scan predicates with their values resolved, keyed by scan slot.
pub type ResolvedScans = HashMap<usize, Vec<ScanPredicate>>;

/// Evaluates every pushed scan predicate once. Values are literals or
/// parameters, so no row is needed.
pub fn resolve_scans(root: &PlanOp, params: &PropertyMap) -> Result<ResolvedScans> {
    fn visit(op: &PlanOp, params: &PropertyMap, out: &mut ResolvedScans) -> Result<()> {
        if let PlanOp::NodeScan(scan) = op {
            let mut resolved = Vec::with_capacity(scan.predicates.len());
            for p in &scan.predicates {
                let value = match &p.value {
                    Expr::Literal(v) => v.clone(),
                    Expr::Parameter(name) => params
                        .get(name)
                        .cloned()
                        .ok_or_else(|| RuntimeError::MissingParameter(name.clone()))?,
                    other => {
                        return Err(CompileError::Unsupported(format!(
                            "scan predicate value '{}'",
                            other.display_name()
                        ))
                        .into());
                    }
                };
                resolved.push(ScanPredicate::new(p.key.clone(), p.op, value));
            }
            out.insert(scan.slot, resolved);
        }
        for child in op.children() {
            visit(child, params, out)?;
        }
        Ok(())
    }
    let mut out = ResolvedScans::new();
    visit(root, params, &mut out)?;
    Ok(out)
}

/// Builds the operator tree for `op`. A `Mutate` node is replaced by the
/// rows its mutation phase produced (`prepared`); so is the `Outer` leaf
/// of an optional match, by the current outer row.
pub fn build<'a>(
    op: &'a PlanOp,
    graph: &'a GraphSnapshot,
    scans: &'a ResolvedScans,
    width: usize,
    prepared: &mut Option<Vec<Row>>,
) -> Result<BoxedOperator<'a>> {
    let child = |input: &'a PlanOp, prepared: &mut Option<Vec<Row>>| build(input, graph, scans, width, prepared);
    let operator: BoxedOperator<'a> = match op {
        PlanOp::Argument => Box::new(ArgumentOperator::new(width)),
        PlanOp::NodeScan(spec) => {
            let predicates = scans.get(&spec.slot).map_or(&[][..], Vec::as_slice);
            Box::new(ScanOperator::new(graph, spec, predicates, width))
        }
        PlanOp::Expand { input, hop, mode, levels } => {
            Box::new(ExpandOperator::new(child(input, prepared)?, hop, *mode, levels))
        }
        PlanOp::Filter { input, predicate, layout, levels, depth } => {
            Box::new(FilterOperator::new(child(input, prepared)?, predicate, layout, levels, *depth))
        }
        PlanOp::Outer => {
            let rows = prepared
                .take()
                .ok_or_else(|| CompileError::Unsupported("outer row outside an optional match".into()))?;
            Box::new(RowsOperator::new(rows))
        }
        PlanOp::Optional { input, inner } => {
            Box::new(OptionalOperator::new(child(input, prepared)?, inner, graph, scans, width))
        }
        PlanOp::Unwind { input, expr, slot, layout } => {
            Box::new(UnwindOperator::new(child(input, prepared)?, expr, *slot, layout))
        }
        PlanOp::Flatten { input, levels } => Box::new(FlattenOperator::new(child(input, prepared)?, levels)),
        PlanOp::CrossProduct { left, right } => {
            let left = child(left, prepared)?;
            let right = child(right, prepared)?;
            Box::new(CrossProductOperator::new(left, right))
        }
        PlanOp::Mutate { .. } => {
            let rows = prepared
                .take()
                .ok_or_else(|| CompileError::Unsupported("mutations need a write transaction".into()))?;
            Box::new(RowsOperator::new(rows))
        }
        PlanOp::Project { input, items, layout } => {
            Box::new(ProjectOperator::new(child(input, prepared)?, items, layout))
        }
        PlanOp::Aggregate { input, keys, aggregates, layout, levels, depth } => Box::new(AggregateOperator::new(
            child(input, prepared)?,
            keys,
            aggregates,
            layout,
            levels,
            *depth,
            width,
        )),
        PlanOp::Distinct { input, slots } => Box::new(DistinctOperator::new(child(input, prepared)?, slots)),
        PlanOp::Sort { input, keys, layout } => Box::new(SortOperator::new(child(input, prepared)?, keys, layout)),
        PlanOp::Skip { input, count } => Box::new(SkipOperator::new(child(input, prepared)?, count)),
        PlanOp::Limit { input, count } => Box::new(LimitOperator::new(child(input, prepared)?, count)),
    };
    Ok(operator)
}

/// Evaluates a SKIP/LIMIT count.
pub(crate) fn window_count(ctx: &ExecContext<'_>, expr: &Expr, clause: &str) -> Result<u64> {
    let layout = Layout::new();
    let value = super::eval::Evaluator::new(ctx, &layout).eval(expr, &Row::new())?;
    match value {
        Value::Int(n) if n >= 0 => Ok(n as u64),
        other => Err(RuntimeError::TypeMismatch {
            context: clause.to_string(),
            expected: "non-negative INTEGER".into(),
            got: other.to_string(),
        }
        .into()),
    }
}
