//! Binder: normalizes MATCH chains into a pattern graph, assigns slots to
//! variables and validates names before any operator is built.

use hashbrown::HashSet;

use crate::config::Config;
use crate::pattern::*;
use crate::storage::GraphSnapshot;
use crate::{CompileError, Result};
use super::plan::{Layout, SlotInfo, SlotKind};

/// Scalar functions the evaluator implements, lower-case.
pub const SCALAR_FUNCTIONS: &[&str] = &[
    "id", "labels", "type", "keys", "size", "length", "coalesce", "toupper", "tolower",
    "tostring", "tointeger", "tofloat", "abs", "startnode", "endnode",
];

// ============================================================================
// Scope
// ============================================================================

/// Slot allocation and name resolution for one statement.
#[derive(Debug, Default)]
pub struct Scope {
    pub slots: Vec<SlotInfo>,
    pub layout: Layout,
    anon: usize,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.layout.get(name).copied()
    }

    pub fn kind(&self, slot: usize) -> Option<SlotKind> {
        self.slots.get(slot).map(|s| s.kind)
    }

    /// Binds a pattern variable, reusing its slot if already bound with the
    /// same kind.
    pub fn declare(&mut self, name: Option<&str>, kind: SlotKind) -> Result<usize> {
        let Some(name) = name else {
            return Ok(self.fresh(kind));
        };
        if let Some(slot) = self.lookup(name) {
            if self.slots[slot].kind != kind {
                return Err(CompileError::AmbiguousVariable(format!(
                    "'{name}' is bound as {:?} and used as {kind:?}",
                    self.slots[slot].kind
                ))
                .into());
            }
            return Ok(slot);
        }
        Ok(self.push(name.to_string(), kind, false))
    }

    /// A name that currently resolves to `slot`, for building expressions
    /// over it. A WITH alias can hide the slot's declared name.
    pub fn name_of(&self, slot: usize) -> String {
        let declared = &self.slots[slot].name;
        if self.lookup(declared) == Some(slot) {
            return declared.clone();
        }
        self.layout
            .iter()
            .filter(|(_, s)| **s == slot)
            .map(|(name, _)| name)
            .min()
            .cloned()
            .unwrap_or_else(|| declared.clone())
    }

    /// Names a query can refer to, in binding order. Generated names of
    /// anonymous elements and internal columns are left out.
    pub fn visible(&self) -> Vec<(String, usize)> {
        let mut out: Vec<(String, usize)> = self
            .layout
            .iter()
            .filter(|(name, slot)| !(self.slots[**slot].anonymous && self.slots[**slot].name == **name))
            .map(|(name, slot)| (name.clone(), *slot))
            .collect();
        out.sort_by(|a, b| (a.1, &a.0).cmp(&(b.1, &b.0)));
        out
    }

    /// Replaces every visible name; slots stay allocated.
    pub fn rescope(&mut self, layout: Layout) {
        self.layout = layout;
    }

    /// A slot for an unnamed pattern element.
    pub fn fresh(&mut self, kind: SlotKind) -> usize {
        let name = format!("_anon{}", self.anon);
        self.anon += 1;
        self.push(name, kind, true)
    }

    /// An internal value slot (projected column, aggregate result).
    pub fn internal(&mut self, name: String) -> usize {
        self.push(name, SlotKind::Value, true)
    }

    fn push(&mut self, name: String, kind: SlotKind, anonymous: bool) -> usize {
        let slot = self.slots.len();
        self.layout.insert(name.clone(), slot);
        self.slots.push(SlotInfo { name, kind, anonymous, optional: false });
        slot
    }
}

// ============================================================================
// Pattern graph
// ============================================================================

#[derive(Debug, Clone)]
pub struct PNode {
    pub slot: usize,
    pub labels: Vec<String>,
    pub props: Vec<(String, Expr)>,
}

#[derive(Debug, Clone)]
pub struct PEdge {
    pub slot: usize,
    /// Pattern-node index of the left element of the chain.
    pub left: usize,
    pub right: usize,
    pub types: Vec<String>,
    pub direction: PatternDirection,
    pub props: Vec<(String, Expr)>,
    pub var_length: Option<(usize, usize)>,
    pub allow_repeated_nodes: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PatternGraph {
    pub nodes: Vec<PNode>,
    pub edges: Vec<PEdge>,
}

impl PatternGraph {
    pub fn node_by_slot(&self, slot: usize) -> Option<usize> {
        self.nodes.iter().position(|n| n.slot == slot)
    }

    /// Connected components as lists of pattern-node indexes, in order of
    /// first appearance.
    pub fn components(&self) -> Vec<Vec<usize>> {
        let n = self.nodes.len();
        let mut comp = vec![usize::MAX; n];
        let mut out: Vec<Vec<usize>> = Vec::new();
        for start in 0..n {
            if comp[start] != usize::MAX {
                continue;
            }
            let id = out.len();
            let mut members = vec![start];
            comp[start] = id;
            let mut i = 0;
            while i < members.len() {
                let cur = members[i];
                i += 1;
                for e in &self.edges {
                    let other = if e.left == cur {
                        e.right
                    } else if e.right == cur {
                        e.left
                    } else {
                        continue;
                    };
                    if comp[other] == usize::MAX {
                        comp[other] = id;
                        members.push(other);
                    }
                }
            }
            members.sort_unstable();
            out.push(members);
        }
        out
    }
}

/// Normalizes MATCH chains into one pattern graph. A variable repeated
/// across chains denotes the same pattern node.
pub fn bind_patterns(patterns: &[Pattern], scope: &mut Scope, config: &Config) -> Result<PatternGraph> {
    let mut graph = PatternGraph::default();
    let mut edge_vars: HashSet<String> = HashSet::new();

    for pattern in patterns {
        let mut prev: Option<usize> = None;
        let mut pending_edge: Option<&EdgePattern> = None;

        for element in &pattern.elements {
            match element {
                PatternElement::Node(np) => {
                    let slot = scope.declare(np.variable.as_deref(), SlotKind::Node)?;
                    let idx = match graph.node_by_slot(slot) {
                        Some(idx) => idx,
                        None => {
                            graph.nodes.push(PNode { slot, labels: Vec::new(), props: Vec::new() });
                            graph.nodes.len() - 1
                        }
                    };
                    let node = &mut graph.nodes[idx];
                    for label in &np.labels {
                        if !node.labels.contains(label) {
                            node.labels.push(label.clone());
                        }
                    }
                    node.props.extend(np.properties.iter().cloned());

                    if let Some(ep) = pending_edge.take() {
                        let Some(left) = prev else {
                            return Err(CompileError::Unsupported("pattern starts with an edge".into()).into());
                        };
                        graph.edges.push(bind_edge(ep, left, idx, scope, &mut edge_vars, config)?);
                    }
                    prev = Some(idx);
                }
                PatternElement::Edge(ep) => {
                    if pending_edge.is_some() || prev.is_none() {
                        return Err(CompileError::Unsupported("edges must sit between nodes".into()).into());
                    }
                    pending_edge = Some(ep);
                }
            }
        }
        if pending_edge.is_some() {
            return Err(CompileError::Unsupported("pattern ends with an edge".into()).into());
        }
    }
    Ok(graph)
}

fn bind_edge(
    ep: &EdgePattern,
    left: usize,
    right: usize,
    scope: &mut Scope,
    edge_vars: &mut HashSet<String>,
    config: &Config,
) -> Result<PEdge> {
    let var_length = match ep.var_length {
        None => None,
        Some(bounds) => Some(repetition_bounds(bounds, ep.allow_repeated_nodes, config)?),
    };
    let kind = if var_length.is_some() { SlotKind::EdgeList } else { SlotKind::Edge };
    if let Some(name) = &ep.variable {
        if !edge_vars.insert(name.clone()) {
            return Err(CompileError::AmbiguousVariable(format!(
                "edge variable '{name}' appears in more than one edge pattern"
            ))
            .into());
        }
    }
    let slot = scope.declare(ep.variable.as_deref(), kind)?;
    Ok(PEdge {
        slot,
        left,
        right,
        types: ep.types.clone(),
        direction: ep.direction,
        props: ep.properties.clone(),
        var_length,
        allow_repeated_nodes: ep.allow_repeated_nodes,
    })
}

/// Resolves `*min..max` into inclusive bounds.
pub fn repetition_bounds(bounds: VarLength, allow_repeated: bool, config: &Config) -> Result<(usize, usize)> {
    let min = bounds.min.unwrap_or(1);
    let max = match bounds.max {
        Some(max) => max,
        None if allow_repeated => {
            return Err(CompileError::InvalidRepetition(
                "an unbounded repetition cannot allow repeated nodes".into(),
            )
            .into());
        }
        None => config.max_var_length,
    };
    if min > max {
        return Err(CompileError::InvalidRepetition(format!("lower bound {min} exceeds upper bound {max}")).into());
    }
    Ok((min, max))
}

// ============================================================================
// Validation
// ============================================================================

/// Checks that every variable is bound and every function is known.
pub fn check_expr(expr: &Expr, layout: &Layout, allow_aggregates: bool) -> Result<()> {
    match expr {
        Expr::Variable(v) => {
            if !layout.contains_key(v.as_str()) {
                return Err(CompileError::UnboundVariable(v.clone()).into());
            }
        }
        Expr::FunctionCall { name, args, .. } => {
            let lower = name.to_ascii_lowercase();
            if is_aggregate_function(&lower) {
                if !allow_aggregates {
                    return Err(CompileError::Unsupported(format!("aggregate '{name}' is not allowed here")).into());
                }
                if args.iter().any(Expr::contains_aggregate) {
                    return Err(CompileError::Unsupported(format!("nested aggregate in '{name}'")).into());
                }
            } else if !SCALAR_FUNCTIONS.contains(&lower.as_str()) {
                return Err(CompileError::UnknownFunction(name.clone()).into());
            }
            for arg in args {
                if !matches!(arg, Expr::Star) {
                    check_expr(arg, layout, allow_aggregates)?;
                }
            }
        }
        Expr::Star => {
            return Err(CompileError::Unsupported("'*' is only valid in RETURN or count(*)".into()).into());
        }
        Expr::Literal(_) | Expr::Parameter(_) => {}
        Expr::Property { expr, .. }
        | Expr::RequiredProperty { expr, .. }
        | Expr::UnaryOp { expr, .. }
        | Expr::IsNull { expr, .. }
        | Expr::HasLabel { expr, .. } => check_expr(expr, layout, allow_aggregates)?,
        Expr::BinaryOp { left, right, .. } | Expr::StringOp { left, right, .. } => {
            check_expr(left, layout, allow_aggregates)?;
            check_expr(right, layout, allow_aggregates)?;
        }
        Expr::In { expr, list } => {
            check_expr(expr, layout, allow_aggregates)?;
            check_expr(list, layout, allow_aggregates)?;
        }
        Expr::List(items) => {
            for item in items {
                check_expr(item, layout, allow_aggregates)?;
            }
        }
        Expr::Case { operand, whens, else_expr } => {
            if let Some(op) = operand {
                check_expr(op, layout, allow_aggregates)?;
            }
            for (w, t) in whens {
                check_expr(w, layout, allow_aggregates)?;
                check_expr(t, layout, allow_aggregates)?;
            }
            if let Some(e) = else_expr {
                check_expr(e, layout, allow_aggregates)?;
            }
        }
    }
    Ok(())
}

/// Rejects labels and edge types the graph has never seen, unless the
/// statement itself introduces them.
pub fn check_catalog(graph: &PatternGraph, stmt: &Statement, view: &GraphSnapshot) -> Result<()> {
    let mut known_labels: HashSet<String> = view.label_names().into_iter().collect();
    let mut known_types: HashSet<String> = view.edge_type_names().into_iter().collect();

    let mut introduce = |pattern: &Pattern| {
        for element in &pattern.elements {
            match element {
                PatternElement::Node(n) => known_labels.extend(n.labels.iter().cloned()),
                PatternElement::Edge(e) => known_types.extend(e.types.iter().cloned()),
            }
        }
    };
    stmt.create.iter().for_each(&mut introduce);
    if let Some(merge) = &stmt.merge {
        introduce(&merge.pattern);
    }
    for item in &stmt.set {
        if let SetItem::Label { label, .. } = item {
            known_labels.insert(label.clone());
        }
    }

    for node in &graph.nodes {
        if let Some(label) = node.labels.iter().find(|l| !known_labels.contains(*l)) {
            return Err(CompileError::UnknownLabel(label.clone()).into());
        }
    }
    for edge in &graph.edges {
        if let Some(t) = edge.types.iter().find(|t| !known_types.contains(*t)) {
            return Err(CompileError::UnknownEdgeType(t.clone()).into());
        }
    }
    Ok(())
}

/// Splits a predicate into its top-level AND operands.
pub fn split_conjuncts(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::BinaryOp { left, op: BinaryOp::And, right } => {
            split_conjuncts(left, out);
            split_conjuncts(right, out);
        }
        other => out.push(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn chain() -> Pattern {
        Pattern::start(NodePattern::var("a").label("Person"))
            .then(EdgePattern::out().edge_type("KNOWS"), NodePattern::var("b"))
            .then(EdgePattern::out().edge_type("KNOWS"), NodePattern::var("c"))
    }

    #[test]
    fn test_binds_chain_and_anonymous_edges() {
        let mut scope = Scope::new();
        let g = bind_patterns(&[chain()], &mut scope, &Config::default()).unwrap();
        assert_eq!(g.nodes.len(), 3);
        assert_eq!(g.edges.len(), 2);
        assert!(scope.slots[g.edges[0].slot].anonymous);
        assert_eq!(g.components().len(), 1);
    }

    #[test]
    fn test_shared_variable_joins_chains() {
        let mut scope = Scope::new();
        let second = Pattern::start(NodePattern::var("c"))
            .then(EdgePattern::out(), NodePattern::var("d"));
        let lone = Pattern::start(NodePattern::var("z"));
        let g = bind_patterns(&[chain(), second, lone], &mut scope, &Config::default()).unwrap();
        assert_eq!(g.nodes.len(), 5);
        assert_eq!(g.components(), vec![vec![0, 1, 2, 3], vec![4]]);
    }

    #[test]
    fn test_node_and_edge_with_same_name_is_ambiguous() {
        let mut scope = Scope::new();
        let p = Pattern::start(NodePattern::var("x")).then(EdgePattern::out().var("x"), NodePattern::var("y"));
        let err = bind_patterns(&[p], &mut scope, &Config::default()).unwrap_err();
        assert!(matches!(err, Error::Compile(CompileError::AmbiguousVariable(_))));
    }

    #[test]
    fn test_rescope_hides_previous_names() {
        let mut scope = Scope::new();
        let a = scope.declare(Some("a"), SlotKind::Node).unwrap();
        scope.fresh(SlotKind::Edge);
        let col = scope.internal("#col0".into());

        let mut layout = Layout::new();
        layout.insert("person".into(), a);
        layout.insert("total".into(), col);
        scope.rescope(layout);

        assert_eq!(scope.lookup("a"), None);
        assert_eq!(scope.name_of(a), "person");
        assert_eq!(scope.visible(), vec![("person".to_string(), a), ("total".to_string(), col)]);
        // A name can be declared again once hidden.
        assert_ne!(scope.declare(Some("a"), SlotKind::Node).unwrap(), a);
    }

    #[test]
    fn test_repetition_bounds() {
        let config = Config::default();
        assert_eq!(repetition_bounds(VarLength { min: None, max: Some(3) }, false, &config).unwrap(), (1, 3));
        assert_eq!(repetition_bounds(VarLength { min: Some(2), max: None }, false, &config).unwrap(), (2, 16));
        assert!(repetition_bounds(VarLength { min: Some(4), max: Some(2) }, false, &config).is_err());
        assert!(repetition_bounds(VarLength { min: None, max: None }, true, &config).is_err());
    }

    #[test]
    fn test_check_expr_reports_unbound_and_unknown_function() {
        let mut layout = Layout::new();
        layout.insert("n".into(), 0);
        assert!(check_expr(&Expr::prop("n", "age"), &layout, false).is_ok());
        assert!(matches!(
            check_expr(&Expr::prop("m", "age"), &layout, false),
            Err(Error::Compile(CompileError::UnboundVariable(_)))
        ));
        assert!(matches!(
            check_expr(&Expr::call("frobnicate", vec![]), &layout, false),
            Err(Error::Compile(CompileError::UnknownFunction(_)))
        ));
        assert!(check_expr(&Expr::count_star(), &layout, false).is_err());
    }
}
