//! Query execution engine.
//!
//! Runs a compiled [`Plan`] against a graph snapshot. Read-only plans run
//! as one pull pipeline. A plan with write clauses runs in two phases:
//! the rows feeding the writes are drained first, the writes are applied
//! through the transaction's [`GraphWriter`], and the rest of the plan then
//! runs over the written rows.

pub mod context;
pub mod eval;
pub mod mutation;
pub mod operators;
pub mod row;

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::debug;

use crate::model::{NodeId, PropertyMap, Value};
use crate::planner::{Plan, PlanOp};
use crate::storage::GraphSnapshot;
use crate::tx::GraphWriter;
use crate::{Error, Result, RuntimeError};

pub use context::{CancellationToken, ExecContext};
pub use row::{FRow, Row, Slot};

use operators::ResolvedScans;

/// Query execution result.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
    pub stats: ExecutionStats,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResultRow> {
        self.rows.iter()
    }

    /// Every value of one column, converted.
    pub fn column<T: FromValue>(&self, name: &str) -> Result<Vec<T>> {
        self.rows.iter().map(|row| row.get(name)).collect()
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.rows
                .iter()
                .map(|row| {
                    let object = row
                        .columns
                        .iter()
                        .zip(&row.values)
                        .map(|(column, value)| (column.clone(), value.to_json()))
                        .collect();
                    serde_json::Value::Object(object)
                })
                .collect(),
        )
    }
}

impl IntoIterator for QueryResult {
    type Item = ResultRow;
    type IntoIter = std::vec::IntoIter<ResultRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'r> IntoIterator for &'r QueryResult {
    type Item = &'r ResultRow;
    type IntoIter = std::slice::Iter<'r, ResultRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// A single row in the result set.
#[derive(Debug, Clone)]
pub struct ResultRow {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl ResultRow {
    /// Get a typed value from the row.
    pub fn get<T: FromValue>(&self, column: &str) -> Result<T> {
        let value = self.value(column).ok_or_else(|| Error::NotFound(format!("column '{column}'")))?;
        T::from_value(value)
    }

    pub fn value(&self, column: &str) -> Option<&Value> {
        self.columns.iter().position(|c| c == column).map(|i| &self.values[i])
    }

    /// Values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Execution statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionStats {
    pub nodes_created: u64,
    pub nodes_deleted: u64,
    pub edges_created: u64,
    pub edges_deleted: u64,
    pub properties_set: u64,
    pub labels_added: u64,
    pub labels_removed: u64,
    /// Rows examined by node scans.
    pub rows_scanned: u64,
    /// Property chunks skipped by zone maps.
    pub chunks_skipped: u64,
    pub execution_time_ms: u64,
}

impl ExecutionStats {
    /// Whether the statement changed the graph.
    pub fn contains_updates(&self) -> bool {
        self.nodes_created + self.nodes_deleted + self.edges_created + self.edges_deleted > 0
            || self.properties_set + self.labels_added + self.labels_removed > 0
    }
}

/// Convert from Value to concrete types.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

fn conversion(expected: &str, got: &Value) -> Error {
    RuntimeError::TypeMismatch {
        context: "result conversion".into(),
        expected: expected.into(),
        got: got.type_name().into(),
    }
    .into()
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_str().map(str::to_string).ok_or_else(|| conversion("STRING", value))
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            _ => Err(conversion("INTEGER", value)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_float().ok_or_else(|| conversion("FLOAT", value))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| conversion("BOOLEAN", value))
    }
}

impl FromValue for NodeId {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int(i) if *i >= 0 => Ok(NodeId(*i as u64)),
            _ => Err(conversion("node id", value)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::List(items) => items.iter().map(T::from_value).collect(),
            _ => Err(conversion("LIST", value)),
        }
    }
}

/// The graph a plan runs against.
pub enum GraphAccess<'a> {
    Read(&'a GraphSnapshot),
    /// The transaction's working snapshot, for plans with write clauses.
    Write(GraphWriter<'a>),
}

/// Execute a compiled plan.
pub fn execute_plan(
    plan: &Plan,
    access: GraphAccess<'_>,
    params: &PropertyMap,
    cancel: &CancellationToken,
) -> Result<QueryResult> {
    let started = Instant::now();
    let scans = operators::resolve_scans(&plan.root, params)?;
    let width = plan.width();
    let mut stats = ExecutionStats::default();

    let rows = match access {
        GraphAccess::Read(graph) => {
            let pipeline = Pipeline { graph, scans: &scans, width, params, cancel };
            pipeline.run(&plan.root, None, &mut stats)?
        }
        GraphAccess::Write(mut writer) => {
            let prepared = match plan.root.find(&|op| matches!(op, PlanOp::Mutate { .. })) {
                Some(PlanOp::Mutate { input, ops, layout }) => {
                    let pipeline = Pipeline { graph: writer.view(), scans: &scans, width, params, cancel };
                    let input_rows = pipeline.run(input, None, &mut stats)?;
                    Some(mutation::apply(ops, layout, input_rows, &mut writer, params, cancel, &mut stats)?)
                }
                _ => None,
            };
            let pipeline = Pipeline { graph: writer.view(), scans: &scans, width, params, cancel };
            pipeline.run(&plan.root, prepared, &mut stats)?
        }
    };

    let columns: Arc<[String]> = plan.columns.iter().cloned().collect();
    let rows: Vec<ResultRow> = rows
        .into_iter()
        .map(|row| ResultRow {
            columns: Arc::clone(&columns),
            values: plan.column_slots.iter().map(|&s| row[s].to_value()).collect(),
        })
        .collect();
    stats.execution_time_ms = started.elapsed().as_millis() as u64;
    debug!(
        rows = rows.len(),
        rows_scanned = stats.rows_scanned,
        chunks_skipped = stats.chunks_skipped,
        elapsed_ms = stats.execution_time_ms,
        "plan executed"
    );
    Ok(QueryResult { columns: plan.columns.clone(), rows, stats })
}

struct Pipeline<'p> {
    graph: &'p GraphSnapshot,
    scans: &'p ResolvedScans,
    width: usize,
    params: &'p PropertyMap,
    cancel: &'p CancellationToken,
}

impl Pipeline<'_> {
    /// Builds and drains the operator tree under `op`.
    fn run(&self, op: &PlanOp, prepared: Option<Vec<Row>>, stats: &mut ExecutionStats) -> Result<Vec<Row>> {
        let ctx = ExecContext::new(self.graph, self.params, self.cancel);
        let mut prepared = prepared;
        let mut root = operators::build(op, self.graph, self.scans, self.width, &mut prepared)?;
        let mut rows = Vec::new();
        while let Some(row) = root.next(&ctx)? {
            rows.push(row.prefix);
        }
        stats.rows_scanned += ctx.rows_scanned.get();
        stats.chunks_skipped += ctx.chunks_skipped.get();
        Ok(rows)
    }
}
