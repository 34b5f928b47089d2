//! Write clauses.
//!
//! Clauses run one at a time over the whole row set: every row sees the
//! effects of the previous clause on every other row. Expressions of a
//! clause are evaluated against the working snapshot, then the change is
//! applied through the [`GraphWriter`], which logs its inverse.

use tracing::debug;

use crate::model::{EdgeId, NodeId, PropertyMap, Value};
use crate::pattern::Expr;
use crate::planner::{Layout, MutationOp, RemoveOp, SetOp};
use crate::tx::GraphWriter;
use crate::{Result, RuntimeError};

use super::context::{CancellationToken, ExecContext};
use super::eval::Evaluator;
use super::row::{Row, Slot};
use super::ExecutionStats;

/// Evaluation side of a mutation: reads only.
struct Reader<'w, 'g> {
    writer: &'w GraphWriter<'g>,
    layout: &'w Layout,
    params: &'w PropertyMap,
    cancel: &'w CancellationToken,
}

impl Reader<'_, '_> {
    fn eval(&self, expr: &Expr, row: &Row) -> Result<Value> {
        let ctx = ExecContext::new(self.writer.view(), self.params, self.cancel);
        Evaluator::new(&ctx, self.layout).eval(expr, row)
    }

    fn eval_map(&self, properties: &[(String, Expr)], row: &Row) -> Result<PropertyMap> {
        properties.iter().map(|(k, e)| Ok((k.clone(), self.eval(e, row)?))).collect()
    }
}

/// Applies `ops` in order to `rows`, returning the rows the statement
/// continues with (MERGE may add rows).
pub(crate) fn apply(
    ops: &[MutationOp],
    layout: &Layout,
    mut rows: Vec<Row>,
    writer: &mut GraphWriter<'_>,
    params: &PropertyMap,
    cancel: &CancellationToken,
    stats: &mut ExecutionStats,
) -> Result<Vec<Row>> {
    for op in ops {
        cancel.check()?;
        rows = match op {
            MutationOp::Delete { slots, detach } => {
                delete(&rows, slots, *detach, writer, stats)?;
                rows
            }
            MutationOp::Merge { slot, labels, properties, on_create, on_match } => {
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    cancel.check()?;
                    let merged = merge(*slot, labels, properties, row, writer, layout, params, cancel, stats)?;
                    for (mut row, created) in merged {
                        let sets = if created { on_create } else { on_match };
                        for set in sets {
                            apply_set(set, &mut row, writer, layout, params, cancel, stats)?;
                        }
                        out.push(row);
                    }
                }
                out
            }
            _ => {
                for row in &mut rows {
                    cancel.check()?;
                    apply_row(op, row, writer, layout, params, cancel, stats)?;
                }
                rows
            }
        };
    }
    debug!(
        rows = rows.len(),
        nodes_created = stats.nodes_created,
        edges_created = stats.edges_created,
        properties_set = stats.properties_set,
        "mutations applied"
    );
    Ok(rows)
}

fn apply_row(
    op: &MutationOp,
    row: &mut Row,
    writer: &mut GraphWriter<'_>,
    layout: &Layout,
    params: &PropertyMap,
    cancel: &CancellationToken,
    stats: &mut ExecutionStats,
) -> Result<()> {
    match op {
        MutationOp::CreateNode { slot, labels, properties } => {
            let props = Reader { writer: &*writer, layout, params, cancel }.eval_map(properties, row)?;
            row[*slot] = Slot::Node(create_node(writer, labels, props, stats));
        }
        MutationOp::CreateEdge { slot, src, dst, edge_type, properties } => {
            let props = Reader { writer: &*writer, layout, params, cancel }.eval_map(properties, row)?;
            let endpoint = |s: usize| {
                row[s].as_node().ok_or_else(|| RuntimeError::TypeMismatch {
                    context: format!("CREATE edge :{edge_type}"),
                    expected: "bound node".into(),
                    got: row[s].to_value().type_name().into(),
                })
            };
            let (from, to) = (endpoint(*src)?, endpoint(*dst)?);
            stats.properties_set += props.values().filter(|v| !v.is_null()).count() as u64;
            let id = writer.create_edge(from, to, edge_type, props)?;
            stats.edges_created += 1;
            row[*slot] = Slot::Edge(id);
        }
        MutationOp::Set(set) => apply_set(set, row, writer, layout, params, cancel, stats)?,
        MutationOp::Remove(remove) => match remove {
            RemoveOp::Property { slot, key } => match &row[*slot] {
                Slot::Node(id) => {
                    if writer.view().node_property(*id, key).is_some() {
                        writer.set_node_property(*id, key, Value::Null)?;
                        stats.properties_set += 1;
                    }
                }
                Slot::Edge(id) => {
                    if writer.view().edge_property(*id, key).is_some() {
                        writer.set_edge_property(*id, key, Value::Null)?;
                        stats.properties_set += 1;
                    }
                }
                Slot::Empty => {}
                other => return Err(not_an_entity("REMOVE", other).into()),
            },
            RemoveOp::Label { slot, label } => match &row[*slot] {
                Slot::Node(id) => {
                    if writer.remove_label(*id, label)? {
                        stats.labels_removed += 1;
                    }
                }
                Slot::Empty => {}
                other => return Err(not_an_entity("REMOVE", other).into()),
            },
        },
        MutationOp::Delete { .. } | MutationOp::Merge { .. } => {}
    }
    Ok(())
}

fn create_node(writer: &mut GraphWriter<'_>, labels: &[String], props: PropertyMap, stats: &mut ExecutionStats) -> NodeId {
    let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
    stats.properties_set += props.values().filter(|v| !v.is_null()).count() as u64;
    let id = writer.create_node(&labels, props);
    stats.nodes_created += 1;
    stats.labels_added += writer.view().labels(id).map_or(0, |l| l.len()) as u64;
    id
}

fn not_an_entity(clause: &str, slot: &Slot) -> RuntimeError {
    RuntimeError::TypeMismatch {
        context: clause.to_string(),
        expected: "node or relationship".into(),
        got: slot.to_value().type_name().into(),
    }
}

fn apply_set(
    set: &SetOp,
    row: &mut Row,
    writer: &mut GraphWriter<'_>,
    layout: &Layout,
    params: &PropertyMap,
    cancel: &CancellationToken,
    stats: &mut ExecutionStats,
) -> Result<()> {
    let reader = Reader { writer: &*writer, layout, params, cancel };
    let (slot, changes): (usize, Vec<(String, Value)>) = match set {
        SetOp::Property { slot, key, value } => (*slot, vec![(key.clone(), reader.eval(value, row)?)]),
        SetOp::MergeProperties { slot, properties } => (*slot, reader.eval_map(properties, row)?.into_iter().collect()),
        SetOp::Label { slot, label } => {
            match &row[*slot] {
                Slot::Node(id) => {
                    if writer.add_label(*id, label)? {
                        stats.labels_added += 1;
                    }
                }
                Slot::Empty => {}
                other => return Err(not_an_entity("SET", other).into()),
            }
            return Ok(());
        }
    };
    for (key, value) in changes {
        match &row[slot] {
            Slot::Node(id) => writer.set_node_property(*id, &key, value)?,
            Slot::Edge(id) => writer.set_edge_property(*id, &key, value)?,
            Slot::Empty => continue,
            other => return Err(not_an_entity("SET", other).into()),
        }
        stats.properties_set += 1;
    }
    Ok(())
}

/// Binds every node matching the labels and properties, or creates one.
/// Returns the output rows, each flagged with whether its node was created.
#[allow(clippy::too_many_arguments)]
fn merge(
    slot: usize,
    labels: &[String],
    properties: &[(String, Expr)],
    row: Row,
    writer: &mut GraphWriter<'_>,
    layout: &Layout,
    params: &PropertyMap,
    cancel: &CancellationToken,
    stats: &mut ExecutionStats,
) -> Result<Vec<(Row, bool)>> {
    let props = Reader { writer: &*writer, layout, params, cancel }.eval_map(properties, &row)?;
    if let Some((key, _)) = props.iter().find(|(_, v)| v.is_null()) {
        return Err(RuntimeError::ConstraintViolation(format!("cannot MERGE on null property '{key}'")).into());
    }

    let view = writer.view();
    let candidates = match labels.first() {
        Some(label) => {
            let mut ids = Vec::new();
            for id in view.scan_nodes(label, &[]) {
                ids.push(id?);
            }
            ids
        }
        None => view.node_ids(),
    };
    let matches: Vec<NodeId> = candidates
        .into_iter()
        .filter(|&id| labels.iter().all(|l| view.has_label(id, l)))
        .filter(|&id| {
            props
                .iter()
                .all(|(k, v)| view.node_property(id, k).is_some_and(|actual| actual.equals(v) == Some(true)))
        })
        .collect();

    if matches.is_empty() {
        let mut row = row;
        row[slot] = Slot::Node(create_node(writer, labels, props, stats));
        return Ok(vec![(row, true)]);
    }
    Ok(matches
        .into_iter()
        .map(|id| {
            let mut bound = row.clone();
            bound[slot] = Slot::Node(id);
            (bound, false)
        })
        .collect())
}

fn delete(
    rows: &[Row],
    slots: &[usize],
    detach: bool,
    writer: &mut GraphWriter<'_>,
    stats: &mut ExecutionStats,
) -> Result<()> {
    let mut edges: Vec<EdgeId> = Vec::new();
    let mut nodes: Vec<NodeId> = Vec::new();
    for row in rows {
        for &slot in slots {
            match &row[slot] {
                Slot::Node(id) => nodes.push(*id),
                Slot::Edge(id) => edges.push(*id),
                Slot::Path(path) => edges.extend(path.iter().copied()),
                Slot::Empty | Slot::Value(Value::Null) => {}
                other => return Err(not_an_entity("DELETE", other).into()),
            }
        }
    }
    for id in edges {
        if writer.delete_edge(id) {
            stats.edges_deleted += 1;
        }
    }
    for id in nodes {
        if let Some(detached) = writer.delete_node(id, detach)? {
            stats.nodes_deleted += 1;
            stats.edges_deleted += detached as u64;
        }
    }
    Ok(())
}
