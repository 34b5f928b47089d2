//! Edge traversal.
//!
//! One operator covers every hop shape the compiler emits:
//! - flat: one output row per matching edge,
//! - variable length: bounded depth-first walk, one row per path,
//! - factorized: the matches become a nested group under the input,
//! - deferred: only the number of matches is kept.

use std::collections::VecDeque;

use hashbrown::HashSet;

use crate::execution::context::ExecContext;
use crate::execution::eval::Evaluator;
use crate::execution::row::{FRow, FactorEntry, FactorGroup, Row, Slot};
use crate::model::{EdgeId, NodeId, Value};
use crate::planner::{ExpandMode, FactorLevel, HopSpec, Layout};
use crate::{Result, RuntimeError};

use super::{BoxedOperator, Operator};

pub struct ExpandOperator<'a> {
    input: BoxedOperator<'a>,
    hop: &'a HopSpec,
    mode: ExpandMode,
    levels: &'a [FactorLevel],
    /// Inline edge/target constraints. They never reference variables, so
    /// they are evaluated once.
    constraints: Option<Constraints>,
    buffer: VecDeque<FRow>,
}

/// Resolved inline property constraints of a hop.
struct Constraints {
    edge: Vec<(String, Value)>,
    target: Vec<(String, Value)>,
}

impl<'a> ExpandOperator<'a> {
    pub fn new(input: BoxedOperator<'a>, hop: &'a HopSpec, mode: ExpandMode, levels: &'a [FactorLevel]) -> Self {
        Self { input, hop, mode, levels, constraints: None, buffer: VecDeque::new() }
    }

    fn constraints(&mut self, ctx: &ExecContext<'a>, row: &Row) -> Result<&Constraints> {
        if self.constraints.is_none() {
            let layout = Layout::new();
            let eval = Evaluator::new(ctx, &layout);
            let resolve = |props: &[(String, crate::pattern::Expr)]| -> Result<Vec<(String, Value)>> {
                props.iter().map(|(k, e)| Ok((k.clone(), eval.eval(e, row)?))).collect()
            };
            self.constraints = Some(Constraints {
                edge: resolve(&self.hop.edge_props)?,
                target: resolve(&self.hop.target_props)?,
            });
        }
        self.constraints.as_ref().ok_or_else(|| {
            RuntimeError::ConstraintViolation("hop constraints unavailable".into()).into()
        })
    }
}

fn props_match(actual: impl Fn(&str) -> Option<Value>, wanted: &[(String, Value)]) -> bool {
    wanted.iter().all(|(key, value)| actual(key).is_some_and(|v| v.equals(value) == Some(true)))
}

/// Single-edge matches of `hop` from `from`, in adjacency order.
fn single_hop(ctx: &ExecContext<'_>, hop: &HopSpec, c: &Constraints, from: NodeId, bound_to: Option<NodeId>) -> Vec<(EdgeId, NodeId)> {
    let graph = ctx.graph;
    let mut out = Vec::new();
    let mut visit = |edge: EdgeId, node: NodeId| {
        if bound_to.is_some_and(|b| b != node) {
            return;
        }
        if !props_match(|k| graph.edge_property(edge, k).cloned(), &c.edge) {
            return;
        }
        if !hop.target_labels.iter().all(|l| graph.has_label(node, l)) {
            return;
        }
        if !props_match(|k| graph.node_property(node, k).cloned(), &c.target) {
            return;
        }
        out.push((edge, node));
    };
    if hop.types.is_empty() {
        for (edge, node) in graph.neighbors(from, None, hop.direction) {
            visit(edge, node);
        }
    } else {
        for edge_type in &hop.types {
            for (edge, node) in graph.neighbors(from, Some(edge_type.as_str()), hop.direction) {
                visit(edge, node);
            }
        }
    }
    out
}

/// Paths of `min..=max` edges from `from`. Edges never repeat within a
/// path; nodes do not either unless the hop allows it.
fn var_length(
    ctx: &ExecContext<'_>,
    hop: &HopSpec,
    c: &Constraints,
    from: NodeId,
    bound_to: Option<NodeId>,
    (min, max): (usize, usize),
) -> Result<Vec<(Vec<EdgeId>, NodeId)>> {
    let graph = ctx.graph;
    let target_ok = |node: NodeId| {
        bound_to.is_none_or(|b| b == node)
            && hop.target_labels.iter().all(|l| graph.has_label(node, l))
            && props_match(|k| graph.node_property(node, k).cloned(), &c.target)
    };
    let step = HopSpec { target_labels: Vec::new(), target_props: Vec::new(), ..hop.clone() };
    let edge_only = Constraints { edge: c.edge.clone(), target: Vec::new() };

    let mut out = Vec::new();
    if min == 0 && target_ok(from) {
        out.push((Vec::new(), from));
    }
    let mut path: Vec<EdgeId> = Vec::new();
    let mut nodes: Vec<NodeId> = vec![from];
    let mut used: HashSet<EdgeId> = HashSet::new();
    // Stack of candidate lists, one per depth.
    let mut stack: Vec<std::vec::IntoIter<(EdgeId, NodeId)>> = vec![single_hop(ctx, &step, &edge_only, from, None).into_iter()];

    while let Some(frontier) = stack.last_mut() {
        ctx.check_cancelled()?;
        let Some((edge, node)) = frontier.next() else {
            stack.pop();
            if let Some(e) = path.pop() {
                used.remove(&e);
                nodes.pop();
            }
            continue;
        };
        if used.contains(&edge) || (!hop.allow_repeated_nodes && nodes.contains(&node)) {
            continue;
        }
        path.push(edge);
        used.insert(edge);
        nodes.push(node);
        if path.len() >= min && target_ok(node) {
            out.push((path.clone(), node));
        }
        if path.len() < max {
            stack.push(single_hop(ctx, &step, &edge_only, node, None).into_iter());
        } else {
            path.pop();
            used.remove(&edge);
            nodes.pop();
        }
    }
    Ok(out)
}

impl<'a> Operator<'a> for ExpandOperator<'a> {
    fn next(&mut self, ctx: &ExecContext<'a>) -> Result<Option<FRow>> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(row));
            }
            ctx.check_cancelled()?;
            let Some(mut input) = self.input.next(ctx)? else { return Ok(None) };
            let hop = self.hop;

            match self.mode {
                ExpandMode::Flat => {
                    let Some(from) = input.prefix[hop.from].as_node() else { continue };
                    let bound_to = if hop.into { input.prefix[hop.to].as_node() } else { None };
                    if hop.into && bound_to.is_none() {
                        continue;
                    }
                    let c = self.constraints(ctx, &input.prefix)?;
                    match hop.var_length {
                        None => {
                            let matches = single_hop(ctx, hop, c, from, bound_to);
                            for (edge, node) in matches {
                                let mut row = input.prefix.clone();
                                row[hop.edge_slot] = Slot::Edge(edge);
                                row[hop.to] = Slot::Node(node);
                                self.buffer.push_back(FRow::flat(row));
                            }
                        }
                        Some(bounds) => {
                            let paths = var_length(ctx, hop, c, from, bound_to, bounds)?;
                            for (edges, node) in paths {
                                let mut row = input.prefix.clone();
                                row[hop.edge_slot] = Slot::Path(edges);
                                row[hop.to] = Slot::Node(node);
                                self.buffer.push_back(FRow::flat(row));
                            }
                        }
                    }
                }
                ExpandMode::Factorized | ExpandMode::Deferred => {
                    let levels = self.levels;
                    let depth = levels.len().saturating_sub(1);
                    let parents = &levels[..depth];
                    let deferred = self.mode == ExpandMode::Deferred;
                    let c = self.constraints(ctx, &input.prefix)?;
                    let alive = input.extend(parents, depth, &mut |row| {
                        let Some(from) = row[hop.from].as_node() else {
                            return Ok(FactorGroup::Materialized(Vec::new()));
                        };
                        let matches = single_hop(ctx, hop, c, from, None);
                        Ok(if deferred {
                            FactorGroup::Deferred(matches.len() as u64)
                        } else {
                            FactorGroup::Materialized(
                                matches
                                    .into_iter()
                                    .map(|(edge, node)| FactorEntry { edge: Slot::Edge(edge), node, child: None })
                                    .collect(),
                            )
                        })
                    })?;
                    if alive {
                        return Ok(Some(input));
                    }
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "Expand"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::CancellationToken;
    use crate::model::*;
    use crate::storage::GraphSnapshot;

    /// 1 -> 2 -> 3 -> 1 cycle plus 3 -> 4
    fn cycle() -> GraphSnapshot {
        let mut g = GraphSnapshot::empty(8);
        for i in 1..=4 {
            g.insert_node(NodeId(i), LabelSet::new(), &PropertyMap::new());
        }
        for (e, (s, d)) in [(1, 2), (2, 3), (3, 1), (3, 4)].into_iter().enumerate() {
            g.insert_edge(EdgeId(e as u64 + 1), NodeId(s), NodeId(d), "NEXT", &PropertyMap::new()).unwrap();
        }
        g
    }

    fn hop(min: usize, max: usize, allow_repeated_nodes: bool) -> HopSpec {
        HopSpec {
            from: 0,
            edge_slot: 1,
            to: 2,
            types: vec!["NEXT".into()],
            direction: Direction::Outgoing,
            edge_props: Vec::new(),
            target_labels: Vec::new(),
            target_props: Vec::new(),
            var_length: Some((min, max)),
            allow_repeated_nodes,
            into: false,
        }
    }

    #[test]
    fn test_var_length_stops_at_cycles() {
        let g = cycle();
        let params = PropertyMap::new();
        let cancel = CancellationToken::new();
        let ctx = ExecContext::new(&g, &params, &cancel);
        let none = Constraints { edge: Vec::new(), target: Vec::new() };

        let mut ends: Vec<u64> = var_length(&ctx, &hop(1, 10, false), &none, NodeId(1), None, (1, 10))
            .unwrap()
            .into_iter()
            .map(|(_, n)| n.0)
            .collect();
        ends.sort_unstable();
        // 1->2, 1->2->3, 1->2->3->4; returning to 1 would repeat a node
        assert_eq!(ends, vec![2, 3, 4]);
    }

    #[test]
    fn test_var_length_with_repeated_nodes_and_zero_hops() {
        let g = cycle();
        let params = PropertyMap::new();
        let cancel = CancellationToken::new();
        let ctx = ExecContext::new(&g, &params, &cancel);
        let none = Constraints { edge: Vec::new(), target: Vec::new() };

        let paths = var_length(&ctx, &hop(0, 3, true), &none, NodeId(1), None, (0, 3)).unwrap();
        let lengths: Vec<usize> = paths.iter().map(|(p, _)| p.len()).collect();
        assert_eq!(lengths.iter().filter(|&&l| l == 0).count(), 1);
        // 3 hops reach back to 1 through the cycle
        assert!(paths.iter().any(|(p, n)| p.len() == 3 && *n == NodeId(1)));
    }
}
