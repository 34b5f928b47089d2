//! Pattern compiler: turns a [`Statement`] into a physical [`Plan`].
//!
//! Compilation order, per query part:
//! 1. bind MATCH chains into a pattern graph ([`binder`]),
//! 2. per connected component, start from a variable an earlier clause
//!    bound, or else pick the start variable with the smallest estimated
//!    cardinality and push eligible WHERE conjuncts into its scan,
//! 3. expand depth-first so every hop starts from a bound variable,
//! 4. choose flat or factorized expansion per hop,
//! 5. add OPTIONAL MATCH and UNWIND, then close the part with its WITH
//!    projection, which replaces the visible names.
//!
//! The last part adds mutations, then the RETURN pipeline.
//!
//! Factorization is only chosen when a single-part statement ends in an
//! aggregation or a DISTINCT over a single connected pattern; everything
//! else runs flat.

pub mod binder;
pub mod plan;

use std::sync::Arc;

use hashbrown::HashSet;
use tracing::{debug, trace};

use crate::config::Config;
use crate::model::Direction;
use crate::pattern::*;
use crate::storage::{CmpOp, GraphSnapshot};
use crate::{CompileError, Result};

use binder::{PatternGraph, Scope};
pub use plan::*;

/// Compiles a statement against the current view of the graph.
///
/// The view is only consulted for cardinality estimates and, when
/// `reject_unknown_labels` is set, the label catalog.
pub fn compile(stmt: &Statement, view: &GraphSnapshot, config: &Config) -> Result<Plan> {
    let mut scope = Scope::new();
    let mut compiler = Compiler {
        graph: Arc::default(),
        view,
        config,
        stmt,
        factorize: false,
        pending: Vec::new(),
        bound: HashSet::new(),
        levels: Vec::new(),
        starts: Vec::new(),
        return_needs: HashSet::new(),
    };

    let mut root: Option<PlanOp> = None;
    for part in &stmt.parts {
        let op = compiler.plan_reading(root.take(), &part.matches, part.where_clause.as_ref(), &part.reading, &mut scope, None)?;
        root = Some(compiler.plan_with(op, &part.with, &mut scope)?);
    }

    let single_part = stmt.parts.is_empty() && stmt.reading.is_empty();
    let factor_return = stmt.return_clause.as_ref().filter(|r| {
        single_part && !stmt.has_mutations() && (r.distinct || r.items.iter().any(|i| i.expr.contains_aggregate()))
    });
    let mut root = compiler.plan_reading(
        root,
        &stmt.matches,
        stmt.where_clause.as_ref(),
        &stmt.reading,
        &mut scope,
        factor_return,
    )?;

    if stmt.has_mutations() {
        root = compiler.flatten(root);
        let ops = plan_mutations(stmt, &mut scope)?;
        root = PlanOp::Mutate { input: Box::new(root), ops, layout: Arc::new(scope.layout.clone()) };
    }

    let (root, columns, column_slots) = compiler.plan_return(root, stmt, &mut scope)?;
    let plan = Plan {
        root,
        slots: scope.slots,
        columns,
        column_slots,
        start_variables: compiler.starts,
    };
    debug!(
        starts = ?plan.start_variables,
        factorized = plan.is_factorized(),
        width = plan.width(),
        "statement compiled"
    );
    Ok(plan)
}

/// A WHERE conjunct waiting for its variables to be bound.
#[derive(Debug)]
struct Conjunct {
    expr: Expr,
    slots: Vec<usize>,
}

impl Conjunct {
    fn new(expr: Expr, scope: &Scope) -> Self {
        let slots = expr.variables().into_iter().filter_map(|v| scope.lookup(v)).collect();
        Self { expr, slots }
    }
}

/// Slots the RETURN clause reads, ignoring row-count aggregates.
fn return_slots(ret: &ReturnClause, scope: &Scope) -> HashSet<usize> {
    let mut needs = HashSet::new();
    for item in &ret.items {
        collect_needed(&item.expr, scope, &mut needs);
    }
    needs
}

fn collect_needed(expr: &Expr, scope: &Scope, needs: &mut HashSet<usize>) {
    if let Expr::FunctionCall { name, args, distinct } = expr {
        if name.eq_ignore_ascii_case("count") && counts_rows(args, *distinct, scope) {
            return;
        }
    }
    if matches!(expr, Expr::Star) {
        needs.extend(0..scope.slots.len());
        return;
    }
    needs.extend(expr.variables().into_iter().filter_map(|v| scope.lookup(v)));
}

/// `count(*)`, or `count(v)` of a node/edge variable that is always bound.
fn counts_rows(args: &[Expr], distinct: bool, scope: &Scope) -> bool {
    match args {
        [Expr::Star] => true,
        [Expr::Variable(v)] if !distinct => scope
            .lookup(v)
            .and_then(|s| scope.slots.get(s))
            .is_some_and(|s| !s.optional && matches!(s.kind, SlotKind::Node | SlotKind::Edge)),
        _ => false,
    }
}

/// A projected clause (WITH or RETURN) after planning.
struct Projection {
    root: PlanOp,
    columns: Vec<String>,
    column_slots: Vec<usize>,
    /// Slot each column name refers to afterwards: the variable's own slot
    /// for a bare variable item, the column slot otherwise.
    bindings: Vec<usize>,
}

struct Compiler<'a> {
    /// Pattern graph of the MATCH being planned.
    graph: Arc<PatternGraph>,
    view: &'a GraphSnapshot,
    config: &'a Config,
    stmt: &'a Statement,
    factorize: bool,
    pending: Vec<Conjunct>,
    bound: HashSet<usize>,
    /// Factor levels of the FRows produced by the current root.
    levels: Vec<FactorLevel>,
    starts: Vec<String>,
    return_needs: HashSet<usize>,
}

impl Compiler<'_> {
    /// Deepest factor level binding any of `slots`.
    fn depth_of(&self, slots: &[usize]) -> usize {
        self.levels
            .iter()
            .rposition(|l| slots.contains(&l.edge_slot) || slots.contains(&l.node_slot))
            .map_or(0, |i| i + 1)
    }

    /// Wraps `root` in a Filter for every pending conjunct whose variables
    /// are now bound.
    fn place_filters(&mut self, mut root: PlanOp, scope: &Scope) -> PlanOp {
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].slots.iter().all(|s| self.bound.contains(s)) {
                let conjunct = self.pending.remove(i);
                let depth = self.depth_of(&conjunct.slots);
                trace!(predicate = %conjunct.expr.display_name(), depth, "filter placed");
                root = PlanOp::Filter {
                    input: Box::new(root),
                    predicate: conjunct.expr,
                    layout: Arc::new(scope.layout.clone()),
                    levels: self.levels.clone(),
                    depth,
                };
            } else {
                i += 1;
            }
        }
        root
    }

    fn flatten(&mut self, root: PlanOp) -> PlanOp {
        if self.levels.is_empty() {
            return root;
        }
        let levels = std::mem::take(&mut self.levels);
        PlanOp::Flatten { input: Box::new(root), levels }
    }

    // ========================================================================
    // Reading clauses
    // ========================================================================

    /// MATCH/WHERE followed by OPTIONAL MATCH and UNWIND clauses.
    fn plan_reading(
        &mut self,
        input: Option<PlanOp>,
        patterns: &[Pattern],
        predicate: Option<&Expr>,
        reading: &[ReadingClause],
        scope: &mut Scope,
        factor_return: Option<&ReturnClause>,
    ) -> Result<PlanOp> {
        let mut root = self.plan_match(input, patterns, predicate, scope, factor_return)?;
        for clause in reading {
            root = match clause {
                ReadingClause::OptionalMatch { patterns, where_clause } => {
                    self.plan_optional(root, patterns, where_clause.as_ref(), scope)?
                }
                ReadingClause::Unwind { expr, variable } => self.plan_unwind(root, expr, variable, scope)?,
            };
        }
        Ok(root)
    }

    /// Plans one MATCH on top of `input`. Pattern nodes bound by an earlier
    /// clause anchor their component instead of being scanned.
    fn plan_match(
        &mut self,
        input: Option<PlanOp>,
        patterns: &[Pattern],
        predicate: Option<&Expr>,
        scope: &mut Scope,
        factor_return: Option<&ReturnClause>,
    ) -> Result<PlanOp> {
        let prior = self.bound.clone();
        let graph = binder::bind_patterns(patterns, scope, self.config)?;
        if self.config.reject_unknown_labels {
            binder::check_catalog(&graph, self.stmt, self.view)?;
        }
        if let Some(edge) = graph.edges.iter().find(|e| prior.contains(&e.slot)) {
            return Err(CompileError::AmbiguousVariable(format!(
                "edge variable '{}' is already bound",
                scope.name_of(edge.slot)
            ))
            .into());
        }

        let mut conjuncts = Vec::new();
        if let Some(predicate) = predicate {
            binder::check_expr(predicate, &scope.layout, false)?;
            binder::split_conjuncts(predicate, &mut conjuncts);
        }
        for (_, e) in graph.nodes.iter().flat_map(|n| &n.props).chain(graph.edges.iter().flat_map(|e| &e.props)) {
            binder::check_expr(e, &scope.layout, false)?;
        }
        // A node bound earlier is not scanned, so its labels and
        // properties become predicates.
        for node in graph.nodes.iter().filter(|n| prior.contains(&n.slot)) {
            let var = scope.name_of(node.slot);
            for label in &node.labels {
                conjuncts.push(Expr::HasLabel { expr: Box::new(Expr::var(var.clone())), label: label.clone() });
            }
            for (key, value) in &node.props {
                conjuncts.push(Expr::prop(var.clone(), key.clone()).equals(value.clone()));
            }
        }

        let components = graph.components();
        self.factorize = self.config.factorized_execution
            && factor_return.is_some()
            && input.is_none()
            && components.len() == 1;
        self.return_needs = match factor_return {
            Some(ret) if self.factorize => return_slots(ret, scope),
            _ => HashSet::new(),
        };
        self.graph = Arc::new(graph);
        self.pending = conjuncts.into_iter().map(|e| Conjunct::new(e, scope)).collect();

        let mut root = input;
        for component in &components {
            root = Some(self.plan_component(root, component, &prior, scope)?);
        }
        let root = self.place_filters(root.unwrap_or(PlanOp::Argument), scope);
        if !self.pending.is_empty() {
            let names: Vec<String> = self.pending.iter().map(|c| c.expr.display_name()).collect();
            return Err(CompileError::Unsupported(format!("unplaced predicates: {}", names.join(", "))).into());
        }
        Ok(root)
    }

    /// Runs the pattern once per input row; rows without a match keep the
    /// new variables empty.
    fn plan_optional(
        &mut self,
        input: PlanOp,
        patterns: &[Pattern],
        predicate: Option<&Expr>,
        scope: &mut Scope,
    ) -> Result<PlanOp> {
        let input = self.flatten(input);
        let outer = self.bound.clone();
        let inner = self.plan_match(Some(PlanOp::Outer), patterns, predicate, scope, None)?;
        let inner = self.flatten(inner);
        for &slot in self.bound.difference(&outer) {
            scope.slots[slot].optional = true;
        }
        trace!(inner = inner.name(), "optional match planned");
        Ok(PlanOp::Optional { input: Box::new(input), inner: Box::new(inner) })
    }

    fn plan_unwind(&mut self, input: PlanOp, expr: &Expr, variable: &str, scope: &mut Scope) -> Result<PlanOp> {
        binder::check_expr(expr, &scope.layout, false)?;
        if scope.lookup(variable).is_some() {
            return Err(CompileError::AmbiguousVariable(format!("'{variable}' is already bound")).into());
        }
        let input = self.flatten(input);
        let layout = Arc::new(scope.layout.clone());
        let slot = scope.declare(Some(variable), SlotKind::Value)?;
        self.bound.insert(slot);
        Ok(PlanOp::Unwind { input: Box::new(input), expr: expr.clone(), slot, layout })
    }

    /// Projects, orders and windows the rows, then makes only the WITH
    /// names visible. A bare variable keeps its own slot, so a node carried
    /// through WITH can anchor a later MATCH.
    fn plan_with(&mut self, root: PlanOp, with: &WithClause, scope: &mut Scope) -> Result<PlanOp> {
        if let Some(item) = with
            .projection
            .items
            .iter()
            .find(|i| i.alias.is_none() && !matches!(i.expr, Expr::Variable(_) | Expr::Star))
        {
            return Err(CompileError::Unsupported(format!(
                "WITH expression '{}' needs an alias",
                item.expr.display_name()
            ))
            .into());
        }
        let projection = self.plan_projection(
            root,
            &with.projection,
            &with.order_by,
            with.skip.as_ref(),
            with.limit.as_ref(),
            scope,
        )?;

        let layout: Layout = projection.columns.iter().cloned().zip(projection.bindings.iter().copied()).collect();
        self.bound.extend(layout.values().copied());
        debug!(names = layout.len(), "query part closed");
        scope.rescope(layout);

        let mut root = projection.root;
        if let Some(predicate) = &with.where_clause {
            binder::check_expr(predicate, &scope.layout, false)?;
            root = PlanOp::Filter {
                input: Box::new(root),
                predicate: predicate.clone(),
                layout: Arc::new(scope.layout.clone()),
                levels: Vec::new(),
                depth: 0,
            };
        }
        Ok(root)
    }

    // ========================================================================
    // Scan
    // ========================================================================

    /// Conjunct index and scan predicate for `slot.key <op> literal|param`.
    fn pushable(&self, slot: usize, scope: &Scope) -> Vec<(usize, PushedPredicate)> {
        let mut out = Vec::new();
        for (i, c) in self.pending.iter().enumerate() {
            let Expr::BinaryOp { left, op, right } = &c.expr else { continue };
            let Some(cmp) = cmp_op(*op) else { continue };
            let as_pred = |prop: &Expr, value: &Expr, cmp: CmpOp| -> Option<PushedPredicate> {
                let Expr::Property { expr, key } = prop else { return None };
                let Expr::Variable(v) = expr.as_ref() else { return None };
                if scope.lookup(v) != Some(slot) || !value.variables().is_empty() {
                    return None;
                }
                if !matches!(value, Expr::Literal(_) | Expr::Parameter(_)) {
                    return None;
                }
                Some(PushedPredicate { key: key.clone(), op: cmp, value: value.clone() })
            };
            if let Some(p) = as_pred(left, right, cmp).or_else(|| as_pred(right, left, cmp.flip())) {
                out.push((i, p));
            }
        }
        out
    }

    fn estimate(&self, node: usize, scope: &Scope) -> f64 {
        let pn = &self.graph.nodes[node];
        let base = if pn.labels.is_empty() {
            self.view.node_count()
        } else {
            pn.labels.iter().map(|l| self.view.label_count(l)).min().unwrap_or(0)
        };
        let base = base as f64;
        let pushed = if pn.labels.is_empty() { Vec::new() } else { self.pushable(pn.slot, scope) };
        let eq = pn.props.len() + pushed.iter().filter(|(_, p)| p.op == CmpOp::Eq).count();
        let range = pushed.len() - pushed.iter().filter(|(_, p)| p.op == CmpOp::Eq).count();
        base * 0.1f64.powi(eq as i32) * 0.5f64.powi(range as i32)
    }

    fn plan_scan(&mut self, node: usize, scope: &Scope) -> PlanOp {
        let graph = Arc::clone(&self.graph);
        let pn = &graph.nodes[node];
        let mut labels = pn.labels.clone();
        labels.sort_by_key(|l| self.view.label_count(l));

        let mut predicates = Vec::new();
        if !labels.is_empty() {
            let pushed = self.pushable(pn.slot, scope);
            for (i, _) in pushed.iter().rev() {
                self.pending.remove(*i);
            }
            predicates.extend(pushed.into_iter().map(|(_, p)| p));
        }
        for (key, value) in &pn.props {
            if !labels.is_empty() && matches!(value, Expr::Literal(_) | Expr::Parameter(_)) {
                predicates.push(PushedPredicate { key: key.clone(), op: CmpOp::Eq, value: value.clone() });
            } else {
                let var = scope.name_of(pn.slot);
                let expr = Expr::prop(var, key.clone()).equals(value.clone());
                self.pending.push(Conjunct::new(expr, scope));
            }
        }
        self.bound.insert(pn.slot);
        PlanOp::NodeScan(ScanSpec { slot: pn.slot, labels, predicates })
    }

    // ========================================================================
    // Components
    // ========================================================================

    fn plan_component(
        &mut self,
        input: Option<PlanOp>,
        component: &[usize],
        prior: &HashSet<usize>,
        scope: &mut Scope,
    ) -> Result<PlanOp> {
        let anchor = component.iter().copied().find(|&n| prior.contains(&self.graph.nodes[n].slot));
        let (start, mut root) = match (anchor, input) {
            (Some(start), Some(input)) => {
                trace!(anchor = %scope.name_of(self.graph.nodes[start].slot), "component anchored");
                let root = self.flatten(input);
                (start, self.place_filters(root, scope))
            }
            (_, input) => {
                let start = component
                    .iter()
                    .copied()
                    .map(|n| (n, self.estimate(n, scope)))
                    .fold(None::<(usize, f64)>, |best, (n, est)| match best {
                        Some((_, b)) if b <= est => best,
                        _ => Some((n, est)),
                    })
                    .map_or(component[0], |(n, _)| n);
                let start_name = scope.name_of(self.graph.nodes[start].slot);
                debug!(start = %start_name, "start variable chosen");
                self.starts.push(start_name);

                // Cross products combine flat rows only.
                let left = input.map(|op| self.flatten(op));
                // Filters placed on the scan may only read the scanned slot.
                let outer = std::mem::take(&mut self.bound);
                let scan = self.plan_scan(start, scope);
                let scan = self.place_filters(scan, scope);
                self.bound.extend(outer);
                let root = match left {
                    None => scan,
                    Some(left) => {
                        let cross = PlanOp::CrossProduct { left: Box::new(left), right: Box::new(scan) };
                        self.place_filters(cross, scope)
                    }
                };
                (start, root)
            }
        };

        let hops = self.expand_order(start, prior, scope)?;
        let modes = self.expand_modes(&hops);
        for (hop, mode) in hops.into_iter().zip(modes) {
            let hop = Arc::new(hop);
            let needs_flatten = match mode {
                ExpandMode::Flat => true,
                _ => self.levels.last().is_some_and(|l| l.node_slot != hop.from),
            };
            if needs_flatten {
                root = self.flatten(root);
            }
            if mode != ExpandMode::Flat {
                self.levels.push(FactorLevel { edge_slot: hop.edge_slot, node_slot: hop.to, hop: Arc::clone(&hop) });
            }
            trace!(from = hop.from, to = hop.to, ?mode, "expand planned");
            self.bound.insert(hop.edge_slot);
            self.bound.insert(hop.to);
            root = PlanOp::Expand { input: Box::new(root), hop, mode, levels: self.levels.clone() };
            root = self.place_filters(root, scope);
        }
        Ok(root)
    }

    /// Depth-first hop order: continue from the most recently bound
    /// variable whenever it has an untraversed pattern edge.
    fn expand_order(&mut self, start: usize, prior: &HashSet<usize>, scope: &Scope) -> Result<Vec<HopSpec>> {
        let graph = Arc::clone(&self.graph);
        let mut order = vec![start];
        let mut used = vec![false; graph.edges.len()];
        let mut hops = Vec::new();

        loop {
            let next = order.iter().rev().find_map(|&n| {
                graph
                    .edges
                    .iter()
                    .enumerate()
                    .find(|(i, e)| !used[*i] && (e.left == n || e.right == n))
                    .map(|(i, _)| (n, i))
            });
            let Some((from, ei)) = next else { break };
            used[ei] = true;
            let edge = &graph.edges[ei];
            let to = if edge.left == from { edge.right } else { edge.left };
            let pattern_dir = match edge.direction {
                PatternDirection::Right => Direction::Outgoing,
                PatternDirection::Left => Direction::Incoming,
                PatternDirection::Both => Direction::Both,
            };
            let direction = if edge.left == from { pattern_dir } else { pattern_dir.reverse() };
            let target = &graph.nodes[to];
            let visited = order.contains(&to);
            let into = visited || prior.contains(&target.slot);

            // An already-bound target had its constraints applied when it was bound.
            let mut target_props = Vec::new();
            if !into {
                let target_name = scope.name_of(target.slot);
                for (key, value) in &target.props {
                    if value.variables().is_empty() {
                        target_props.push((key.clone(), value.clone()));
                    } else {
                        let expr = Expr::prop(target_name.clone(), key.clone()).equals(value.clone());
                        self.pending.push(Conjunct::new(expr, scope));
                    }
                }
            }
            let (edge_props, dynamic): (Vec<_>, Vec<_>) =
                edge.props.iter().cloned().partition(|(_, e)| e.variables().is_empty());
            if !dynamic.is_empty() {
                if edge.var_length.is_some() {
                    return Err(CompileError::Unsupported(
                        "repetition properties must be literals or parameters".into(),
                    )
                    .into());
                }
                let edge_name = scope.name_of(edge.slot);
                for (key, value) in dynamic {
                    let expr = Expr::prop(edge_name.clone(), key).equals(value);
                    self.pending.push(Conjunct::new(expr, scope));
                }
            }

            hops.push(HopSpec {
                from: graph.nodes[from].slot,
                edge_slot: edge.slot,
                to: target.slot,
                types: edge.types.clone(),
                direction,
                edge_props,
                target_labels: if into { Vec::new() } else { target.labels.clone() },
                target_props,
                var_length: edge.var_length,
                allow_repeated_nodes: edge.allow_repeated_nodes,
                into,
            });
            if !visited {
                order.push(to);
            }
        }
        Ok(hops)
    }

    fn expand_modes(&self, hops: &[HopSpec]) -> Vec<ExpandMode> {
        let mut modes: Vec<ExpandMode> = hops
            .iter()
            .map(|hop| {
                let flat = !self.factorize || hop.var_length.is_some() || hop.into || !hop.is_static();
                if flat { ExpandMode::Flat } else { ExpandMode::Factorized }
            })
            .collect();

        if let (Some(last), Some(mode)) = (hops.last(), modes.last_mut()) {
            let referenced = |slot: usize| {
                self.return_needs.contains(&slot) || self.pending.iter().any(|c| c.slots.contains(&slot))
            };
            if *mode == ExpandMode::Factorized && !referenced(last.to) && !referenced(last.edge_slot) {
                *mode = ExpandMode::Deferred;
            }
        }
        modes
    }

    // ========================================================================
    // RETURN / WITH projection
    // ========================================================================

    fn plan_return(
        &mut self,
        root: PlanOp,
        stmt: &Statement,
        scope: &mut Scope,
    ) -> Result<(PlanOp, Vec<String>, Vec<usize>)> {
        let Some(ret) = &stmt.return_clause else {
            if !stmt.order_by.is_empty() || stmt.skip.is_some() || stmt.limit.is_some() {
                return Err(CompileError::Unsupported("ORDER BY/SKIP/LIMIT without RETURN".into()).into());
            }
            return Ok((self.flatten(root), Vec::new(), Vec::new()));
        };
        let projection =
            self.plan_projection(root, ret, &stmt.order_by, stmt.skip.as_ref(), stmt.limit.as_ref(), scope)?;
        Ok((projection.root, projection.columns, projection.column_slots))
    }

    fn plan_projection(
        &mut self,
        mut root: PlanOp,
        ret: &ReturnClause,
        order_by: &[OrderExpr],
        skip: Option<&Expr>,
        limit: Option<&Expr>,
        scope: &mut Scope,
    ) -> Result<Projection> {
        let items = expand_star(&ret.items, scope)?;
        let mut columns = Vec::with_capacity(items.len());
        for item in &items {
            let name = item.alias.clone().unwrap_or_else(|| item.expr.display_name());
            if columns.contains(&name) {
                return Err(CompileError::AmbiguousVariable(format!("duplicate column '{name}'")).into());
            }
            columns.push(name);
        }
        let column_slots: Vec<usize> = (0..items.len()).map(|i| scope.internal(format!("#col{i}"))).collect();
        let bindings: Vec<usize> = items
            .iter()
            .zip(&column_slots)
            .map(|(item, &column)| match &item.expr {
                Expr::Variable(v) => scope.lookup(v).unwrap_or(column),
                _ => column,
            })
            .collect();
        let aggregating = items.iter().any(|i| i.expr.contains_aggregate());
        // DISTINCT over factorized rows dedupes while grouping, at the
        // depth its columns need.
        let grouping = aggregating || (ret.distinct && !self.levels.is_empty());

        let mut sort_layout;
        if grouping {
            let mut keys = Vec::new();
            let mut aggs: Vec<(Expr, AggSpec)> = Vec::new();
            let mut post_items = Vec::new();
            let mut post_layout = Layout::new();

            for (i, item) in items.iter().enumerate() {
                if item.expr.contains_aggregate() {
                    binder::check_expr(&item.expr, &scope.layout, true)?;
                    let rewritten = extract_aggregates(&item.expr, &mut aggs, scope)?;
                    post_items.push((column_slots[i], rewritten));
                } else {
                    binder::check_expr(&item.expr, &scope.layout, false)?;
                    let variable_slot = match &item.expr {
                        Expr::Variable(v) => scope.lookup(v),
                        _ => None,
                    };
                    if let (Expr::Variable(v), Some(slot)) = (&item.expr, variable_slot) {
                        post_layout.insert(v.clone(), slot);
                    }
                    post_layout.insert(columns[i].clone(), column_slots[i]);
                    keys.push(GroupingKey { expr: item.expr.clone(), slot: column_slots[i], variable_slot });
                }
            }
            for (_, spec) in &aggs {
                post_layout.insert(scope.slots[spec.slot].name.clone(), spec.slot);
            }
            for (_, expr) in &post_items {
                binder::check_expr(expr, &post_layout, false)?;
            }

            let mut needed: Vec<usize> = Vec::new();
            for key in &keys {
                needed.extend(key.expr.variables().into_iter().filter_map(|v| scope.lookup(v)));
            }
            for (_, spec) in &aggs {
                if let (Some(arg), false) = (&spec.arg, spec.func == AggFunc::CountRows) {
                    needed.extend(arg.variables().into_iter().filter_map(|v| scope.lookup(v)));
                }
            }
            let depth = self.depth_of(&needed);
            let levels = std::mem::take(&mut self.levels);
            root = PlanOp::Aggregate {
                input: Box::new(root),
                keys,
                aggregates: aggs.iter().map(|(_, s)| s.clone()).collect(),
                layout: Arc::new(scope.layout.clone()),
                levels,
                depth,
            };
            if !post_items.is_empty() {
                root = PlanOp::Project { input: Box::new(root), items: post_items, layout: Arc::new(post_layout.clone()) };
            }
            if ret.distinct && aggregating {
                root = PlanOp::Distinct { input: Box::new(root), slots: column_slots.clone() };
            }
            sort_layout = post_layout;
            for (i, name) in columns.iter().enumerate() {
                sort_layout.insert(name.clone(), bindings[i]);
                sort_layout.insert(format!("#col{i}"), column_slots[i]);
            }
            // ORDER BY may repeat an aggregate call that RETURN already computes.
            let order_by: Vec<OrderExpr> = order_by
                .iter()
                .map(|o| {
                    let expr = rewrite_known_aggregates(&o.expr, &aggs, scope);
                    OrderExpr { expr, ..o.clone() }
                })
                .collect();
            root = self.plan_order(root, &order_by, &items, &sort_layout, ret.distinct, &columns)?;
        } else {
            for item in &items {
                binder::check_expr(&item.expr, &scope.layout, false)?;
            }
            root = self.flatten(root);
            root = PlanOp::Project {
                input: Box::new(root),
                items: column_slots.iter().copied().zip(items.iter().map(|i| i.expr.clone())).collect(),
                layout: Arc::new(scope.layout.clone()),
            };
            if ret.distinct {
                root = PlanOp::Distinct { input: Box::new(root), slots: column_slots.clone() };
            }
            sort_layout = scope.layout.clone();
            for (name, slot) in columns.iter().zip(&bindings) {
                sort_layout.insert(name.clone(), *slot);
            }
            root = self.plan_order(root, order_by, &items, &sort_layout, ret.distinct, &columns)?;
        }

        for (clause, count) in [("SKIP", skip), ("LIMIT", limit)] {
            if let Some(expr) = count {
                if !expr.variables().is_empty() {
                    return Err(CompileError::Unsupported(format!("{clause} must be a literal or parameter")).into());
                }
            }
        }
        if let Some(skip) = skip {
            root = PlanOp::Skip { input: Box::new(root), count: skip.clone() };
        }
        if let Some(limit) = limit {
            root = PlanOp::Limit { input: Box::new(root), count: limit.clone() };
        }
        Ok(Projection { root, columns, column_slots, bindings })
    }

    fn plan_order(
        &mut self,
        root: PlanOp,
        order_by: &[OrderExpr],
        items: &[ReturnItem],
        sort_layout: &Layout,
        distinct: bool,
        columns: &[String],
    ) -> Result<PlanOp> {
        if order_by.is_empty() {
            return Ok(root);
        }
        let mut keys = Vec::with_capacity(order_by.len());
        for o in order_by {
            let expr = match items.iter().position(|i| i.expr == o.expr) {
                Some(i) => Expr::Variable(format!("#col{i}")),
                None => o.expr.clone(),
            };
            binder::check_expr(&expr, sort_layout, false)?;
            let projected = |v: &str| v.starts_with("#col") || columns.iter().any(|c| c == v);
            if distinct && !expr.variables().into_iter().all(projected) {
                return Err(CompileError::Unsupported(
                    "ORDER BY after DISTINCT must use returned columns".into(),
                )
                .into());
            }
            let nulls_first = match o.nulls {
                NullsOrder::Default => !o.ascending,
                NullsOrder::First => true,
                NullsOrder::Last => false,
            };
            keys.push(SortKey { expr, ascending: o.ascending, nulls_first });
        }
        Ok(PlanOp::Sort { input: Box::new(root), keys, layout: Arc::new(sort_layout.clone()) })
    }
}

fn cmp_op(op: BinaryOp) -> Option<CmpOp> {
    Some(match op {
        BinaryOp::Eq => CmpOp::Eq,
        BinaryOp::Neq => CmpOp::Ne,
        BinaryOp::Lt => CmpOp::Lt,
        BinaryOp::Lte => CmpOp::Le,
        BinaryOp::Gt => CmpOp::Gt,
        BinaryOp::Gte => CmpOp::Ge,
        _ => return None,
    })
}

/// `*` becomes every visible variable, in binding order.
fn expand_star(items: &[ReturnItem], scope: &Scope) -> Result<Vec<ReturnItem>> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if matches!(item.expr, Expr::Star) {
            out.extend(scope.visible().into_iter().map(|(name, _)| ReturnItem::new(Expr::var(name))));
        } else {
            out.push(item.clone());
        }
    }
    if out.is_empty() {
        return Err(CompileError::Unsupported("RETURN * with no named variables".into()).into());
    }
    Ok(out)
}

fn agg_func(name: &str, args: &[Expr], distinct: bool, scope: &Scope) -> Result<AggFunc> {
    let lower = name.to_ascii_lowercase();
    if args.len() != 1 {
        return Err(CompileError::Unsupported(format!("{name}() takes exactly one argument")).into());
    }
    if matches!(args[0], Expr::Star) && lower != "count" {
        return Err(CompileError::Unsupported(format!("{name}(*) is not supported")).into());
    }
    Ok(match lower.as_str() {
        "count" if counts_rows(args, distinct, scope) => AggFunc::CountRows,
        "count" => AggFunc::Count,
        "sum" => AggFunc::Sum,
        "avg" => AggFunc::Avg,
        "min" => AggFunc::Min,
        "max" => AggFunc::Max,
        "collect" => AggFunc::Collect,
        _ => return Err(CompileError::UnknownFunction(name.to_string()).into()),
    })
}

/// Replaces each aggregate call with a reference to its result slot,
/// allocating one slot per distinct call.
fn extract_aggregates(expr: &Expr, aggs: &mut Vec<(Expr, AggSpec)>, scope: &mut Scope) -> Result<Expr> {
    if let Expr::FunctionCall { name, args, distinct } = expr {
        if is_aggregate_function(name) {
            if let Some((_, spec)) = aggs.iter().find(|(call, _)| call == expr) {
                return Ok(Expr::Variable(scope.slots[spec.slot].name.clone()));
            }
            let func = agg_func(name, args, *distinct, scope)?;
            let arg = match &args[0] {
                Expr::Star => None,
                other => Some(other.clone()),
            };
            let slot_name = format!("#agg{}", aggs.len());
            let slot = scope.internal(slot_name.clone());
            aggs.push((expr.clone(), AggSpec { func, arg, distinct: *distinct, slot }));
            return Ok(Expr::Variable(slot_name));
        }
    }
    Ok(match expr {
        Expr::FunctionCall { name, args, distinct } => Expr::FunctionCall {
            name: name.clone(),
            args: args.iter().map(|a| extract_aggregates(a, aggs, scope)).collect::<Result<_>>()?,
            distinct: *distinct,
        },
        Expr::BinaryOp { left, op, right } => Expr::BinaryOp {
            left: Box::new(extract_aggregates(left, aggs, scope)?),
            op: *op,
            right: Box::new(extract_aggregates(right, aggs, scope)?),
        },
        Expr::UnaryOp { op, expr } => Expr::UnaryOp { op: *op, expr: Box::new(extract_aggregates(expr, aggs, scope)?) },
        Expr::List(items) => {
            Expr::List(items.iter().map(|i| extract_aggregates(i, aggs, scope)).collect::<Result<_>>()?)
        }
        Expr::Case { operand, whens, else_expr } => Expr::Case {
            operand: match operand {
                Some(o) => Some(Box::new(extract_aggregates(o, aggs, scope)?)),
                None => None,
            },
            whens: whens
                .iter()
                .map(|(w, t)| Ok((extract_aggregates(w, aggs, scope)?, extract_aggregates(t, aggs, scope)?)))
                .collect::<Result<_>>()?,
            else_expr: match else_expr {
                Some(e) => Some(Box::new(extract_aggregates(e, aggs, scope)?)),
                None => None,
            },
        },
        Expr::IsNull { expr, negated } => {
            Expr::IsNull { expr: Box::new(extract_aggregates(expr, aggs, scope)?), negated: *negated }
        }
        other => other.clone(),
    })
}

/// Rewrites aggregate calls already computed by RETURN into slot references.
fn rewrite_known_aggregates(expr: &Expr, aggs: &[(Expr, AggSpec)], scope: &Scope) -> Expr {
    if let Some((_, spec)) = aggs.iter().find(|(call, _)| call == expr) {
        return Expr::Variable(scope.slots[spec.slot].name.clone());
    }
    match expr {
        Expr::BinaryOp { left, op, right } => Expr::BinaryOp {
            left: Box::new(rewrite_known_aggregates(left, aggs, scope)),
            op: *op,
            right: Box::new(rewrite_known_aggregates(right, aggs, scope)),
        },
        Expr::UnaryOp { op, expr } => {
            Expr::UnaryOp { op: *op, expr: Box::new(rewrite_known_aggregates(expr, aggs, scope)) }
        }
        other => other.clone(),
    }
}

// ============================================================================
// Mutations
// ============================================================================

fn plan_mutations(stmt: &Statement, scope: &mut Scope) -> Result<Vec<MutationOp>> {
    let mut ops = Vec::new();

    for pattern in &stmt.create {
        let mut prev: Option<usize> = None;
        let mut pending_edge: Option<&EdgePattern> = None;
        for element in &pattern.elements {
            match element {
                PatternElement::Node(np) => {
                    let slot = create_node_slot(np, scope, &mut ops)?;
                    if let Some(ep) = pending_edge.take() {
                        let Some(left) = prev else {
                            return Err(CompileError::Unsupported("CREATE pattern starts with an edge".into()).into());
                        };
                        ops.push(create_edge_op(ep, left, slot, scope)?);
                    }
                    prev = Some(slot);
                }
                PatternElement::Edge(ep) => {
                    if prev.is_none() || pending_edge.is_some() {
                        return Err(CompileError::Unsupported("edges must sit between nodes".into()).into());
                    }
                    pending_edge = Some(ep);
                }
            }
        }
        if pending_edge.is_some() {
            return Err(CompileError::Unsupported("CREATE pattern ends with an edge".into()).into());
        }
    }

    if let Some(merge) = &stmt.merge {
        let [PatternElement::Node(np)] = merge.pattern.elements.as_slice() else {
            return Err(CompileError::Unsupported("MERGE supports a single node pattern".into()).into());
        };
        if let Some(name) = &np.variable {
            if scope.lookup(name).is_some() {
                return Err(CompileError::AmbiguousVariable(format!("'{name}' is already bound")).into());
            }
        }
        for (_, e) in &np.properties {
            binder::check_expr(e, &scope.layout, false)?;
        }
        let slot = scope.declare(np.variable.as_deref(), SlotKind::Node)?;
        let on_create = merge.on_create.iter().map(|i| set_op(i, scope)).collect::<Result<_>>()?;
        let on_match = merge.on_match.iter().map(|i| set_op(i, scope)).collect::<Result<_>>()?;
        ops.push(MutationOp::Merge {
            slot,
            labels: np.labels.clone(),
            properties: np.properties.clone(),
            on_create,
            on_match,
        });
    }

    for item in &stmt.set {
        ops.push(MutationOp::Set(set_op(item, scope)?));
    }
    for item in &stmt.remove {
        let op = match item {
            RemoveItem::Property { variable, key } => {
                RemoveOp::Property { slot: entity_slot(variable, scope, false)?, key: key.clone() }
            }
            RemoveItem::Label { variable, label } => {
                RemoveOp::Label { slot: entity_slot(variable, scope, true)?, label: label.clone() }
            }
        };
        ops.push(MutationOp::Remove(op));
    }
    if let Some(delete) = &stmt.delete {
        let mut slots = Vec::with_capacity(delete.variables.len());
        for var in &delete.variables {
            let slot = scope.lookup(var).ok_or_else(|| CompileError::UnboundVariable(var.clone()))?;
            if scope.kind(slot) == Some(SlotKind::Value) {
                return Err(CompileError::Unsupported(format!("cannot DELETE value '{var}'")).into());
            }
            slots.push(slot);
        }
        ops.push(MutationOp::Delete { slots, detach: delete.detach });
    }
    Ok(ops)
}

fn create_node_slot(np: &NodePattern, scope: &mut Scope, ops: &mut Vec<MutationOp>) -> Result<usize> {
    if let Some(name) = &np.variable {
        if let Some(slot) = scope.lookup(name) {
            if !np.labels.is_empty() || !np.properties.is_empty() {
                return Err(CompileError::AmbiguousVariable(format!("'{name}' is already bound")).into());
            }
            if scope.kind(slot) != Some(SlotKind::Node) {
                return Err(CompileError::AmbiguousVariable(format!("'{name}' is not a node")).into());
            }
            return Ok(slot);
        }
    }
    for (_, e) in &np.properties {
        binder::check_expr(e, &scope.layout, false)?;
    }
    let slot = scope.declare(np.variable.as_deref(), SlotKind::Node)?;
    ops.push(MutationOp::CreateNode { slot, labels: np.labels.clone(), properties: np.properties.clone() });
    Ok(slot)
}

fn create_edge_op(ep: &EdgePattern, left: usize, right: usize, scope: &mut Scope) -> Result<MutationOp> {
    let [edge_type] = ep.types.as_slice() else {
        return Err(CompileError::Unsupported("CREATE needs exactly one edge type".into()).into());
    };
    if ep.var_length.is_some() {
        return Err(CompileError::Unsupported("CREATE cannot use a repetition".into()).into());
    }
    let (src, dst) = match ep.direction {
        PatternDirection::Right => (left, right),
        PatternDirection::Left => (right, left),
        PatternDirection::Both => {
            return Err(CompileError::Unsupported("CREATE needs a directed edge".into()).into());
        }
    };
    if let Some(name) = &ep.variable {
        if scope.lookup(name).is_some() {
            return Err(CompileError::AmbiguousVariable(format!("'{name}' is already bound")).into());
        }
    }
    for (_, e) in &ep.properties {
        binder::check_expr(e, &scope.layout, false)?;
    }
    let slot = scope.declare(ep.variable.as_deref(), SlotKind::Edge)?;
    Ok(MutationOp::CreateEdge { slot, src, dst, edge_type: edge_type.clone(), properties: ep.properties.clone() })
}

/// Slot of a node (or, unless `node_only`, edge) variable.
fn entity_slot(variable: &str, scope: &Scope, node_only: bool) -> Result<usize> {
    let slot = scope.lookup(variable).ok_or_else(|| CompileError::UnboundVariable(variable.to_string()))?;
    match scope.kind(slot) {
        Some(SlotKind::Node) => Ok(slot),
        Some(SlotKind::Edge) if !node_only => Ok(slot),
        _ => Err(CompileError::Unsupported(format!("'{variable}' cannot be updated this way")).into()),
    }
}

fn set_op(item: &SetItem, scope: &Scope) -> Result<SetOp> {
    Ok(match item {
        SetItem::Property { variable, key, value } => {
            binder::check_expr(value, &scope.layout, false)?;
            SetOp::Property { slot: entity_slot(variable, scope, false)?, key: key.clone(), value: value.clone() }
        }
        SetItem::MergeProperties { variable, properties } => {
            for (_, e) in properties {
                binder::check_expr(e, &scope.layout, false)?;
            }
            SetOp::MergeProperties { slot: entity_slot(variable, scope, false)?, properties: properties.clone() }
        }
        SetItem::Label { variable, label } => {
            SetOp::Label { slot: entity_slot(variable, scope, true)?, label: label.clone() }
        }
    })
}
