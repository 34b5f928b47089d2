//! Physical plan produced by the compiler.
//!
//! A plan is an operator tree. Rows flowing through it are fixed-width
//! slot vectors; every variable, projected column and aggregate result has
//! a slot assigned at compile time.

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::model::Direction;
use crate::pattern::Expr;
use crate::storage::CmpOp;

/// Variable/column name to slot index.
pub type Layout = HashMap<String, usize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Node,
    Edge,
    /// Edges of a variable-length hop.
    EdgeList,
    Value,
}

#[derive(Debug, Clone)]
pub struct SlotInfo {
    pub name: String,
    pub kind: SlotKind,
    /// Generated for an unnamed pattern element.
    pub anonymous: bool,
    /// Bound by an OPTIONAL MATCH, so possibly empty.
    pub optional: bool,
}

/// One pattern edge traversal.
#[derive(Debug, Clone)]
pub struct HopSpec {
    pub from: usize,
    pub edge_slot: usize,
    pub to: usize,
    pub types: Vec<String>,
    /// Direction relative to `from`.
    pub direction: Direction,
    pub edge_props: Vec<(String, Expr)>,
    pub target_labels: Vec<String>,
    pub target_props: Vec<(String, Expr)>,
    /// Inclusive hop bounds of a repetition.
    pub var_length: Option<(usize, usize)>,
    pub allow_repeated_nodes: bool,
    /// `to` is already bound; the hop only checks connectivity.
    pub into: bool,
}

impl HopSpec {
    /// Whether inline constraints can be evaluated without a row.
    pub fn is_static(&self) -> bool {
        self.edge_props.iter().chain(&self.target_props).all(|(_, e)| e.variables().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandMode {
    /// One output row per traversed edge.
    Flat,
    /// Neighbor sets kept as a nested group under the prefix binding.
    Factorized,
    /// Last hop left unexpanded; only its cardinality is used.
    Deferred,
}

/// Slots bound at one level of a factorized group.
#[derive(Debug, Clone)]
pub struct FactorLevel {
    pub edge_slot: usize,
    pub node_slot: usize,
    pub hop: Arc<HopSpec>,
}

/// A `key <op> expr` predicate pushed into a scan. The value is evaluated
/// once per execution (literal or parameter).
#[derive(Debug, Clone)]
pub struct PushedPredicate {
    pub key: String,
    pub op: CmpOp,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub struct ScanSpec {
    pub slot: usize,
    /// The first label picks the table; the rest are checked per row.
    pub labels: Vec<String>,
    pub predicates: Vec<PushedPredicate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    /// `count(*)` or `count(v)` of an always-bound pattern variable.
    CountRows,
    Sum,
    Avg,
    Min,
    Max,
    Collect,
}

#[derive(Debug, Clone)]
pub struct AggSpec {
    pub func: AggFunc,
    pub arg: Option<Expr>,
    pub distinct: bool,
    pub slot: usize,
}

#[derive(Debug, Clone)]
pub struct GroupingKey {
    pub expr: Expr,
    pub slot: usize,
    /// For a bare variable key, the variable's own slot is kept bound too.
    pub variable_slot: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub expr: Expr,
    pub ascending: bool,
    pub nulls_first: bool,
}

#[derive(Debug, Clone)]
pub enum SetOp {
    Property { slot: usize, key: String, value: Expr },
    MergeProperties { slot: usize, properties: Vec<(String, Expr)> },
    Label { slot: usize, label: String },
}

#[derive(Debug, Clone)]
pub enum RemoveOp {
    Property { slot: usize, key: String },
    Label { slot: usize, label: String },
}

#[derive(Debug, Clone)]
pub enum MutationOp {
    CreateNode { slot: usize, labels: Vec<String>, properties: Vec<(String, Expr)> },
    CreateEdge { slot: usize, src: usize, dst: usize, edge_type: String, properties: Vec<(String, Expr)> },
    Merge {
        slot: usize,
        labels: Vec<String>,
        properties: Vec<(String, Expr)>,
        on_create: Vec<SetOp>,
        on_match: Vec<SetOp>,
    },
    Set(SetOp),
    Remove(RemoveOp),
    Delete { slots: Vec<usize>, detach: bool },
}

/// Operator tree node.
#[derive(Debug, Clone)]
pub enum PlanOp {
    /// Produces a single empty row.
    Argument,
    NodeScan(ScanSpec),
    Expand {
        input: Box<PlanOp>,
        hop: Arc<HopSpec>,
        mode: ExpandMode,
        /// Factor levels after this expand (empty when flat).
        levels: Vec<FactorLevel>,
    },
    Filter {
        input: Box<PlanOp>,
        predicate: Expr,
        layout: Arc<Layout>,
        levels: Vec<FactorLevel>,
        /// Factor level the predicate needs bound (0 = prefix only).
        depth: usize,
    },
    /// The outer row an enclosing `Optional` runs `inner` for.
    Outer,
    /// Left-outer join: runs `inner` once per input row and keeps the row,
    /// with the inner slots empty, when `inner` produces nothing.
    Optional { input: Box<PlanOp>, inner: Box<PlanOp> },
    /// One row per element of the list `expr` evaluates to.
    Unwind { input: Box<PlanOp>, expr: Expr, slot: usize, layout: Arc<Layout> },
    /// Turns factorized groups into one flat row per full binding.
    Flatten { input: Box<PlanOp>, levels: Vec<FactorLevel> },
    CrossProduct { left: Box<PlanOp>, right: Box<PlanOp> },
    /// Pipeline breaker: drains `input`, then applies `ops` to each row.
    Mutate { input: Box<PlanOp>, ops: Vec<MutationOp>, layout: Arc<Layout> },
    Project {
        input: Box<PlanOp>,
        items: Vec<(usize, Expr)>,
        layout: Arc<Layout>,
    },
    Aggregate {
        input: Box<PlanOp>,
        keys: Vec<GroupingKey>,
        aggregates: Vec<AggSpec>,
        layout: Arc<Layout>,
        levels: Vec<FactorLevel>,
        /// Factor levels the keys and arguments need bound.
        depth: usize,
    },
    /// Keeps the first row for each distinct combination of `slots`.
    Distinct { input: Box<PlanOp>, slots: Vec<usize> },
    Sort { input: Box<PlanOp>, keys: Vec<SortKey>, layout: Arc<Layout> },
    Skip { input: Box<PlanOp>, count: Expr },
    Limit { input: Box<PlanOp>, count: Expr },
}

impl PlanOp {
    pub fn name(&self) -> &'static str {
        match self {
            PlanOp::Argument => "Argument",
            PlanOp::NodeScan(_) => "NodeScan",
            PlanOp::Expand { .. } => "Expand",
            PlanOp::Filter { .. } => "Filter",
            PlanOp::Outer => "Outer",
            PlanOp::Optional { .. } => "Optional",
            PlanOp::Unwind { .. } => "Unwind",
            PlanOp::Flatten { .. } => "Flatten",
            PlanOp::CrossProduct { .. } => "CrossProduct",
            PlanOp::Mutate { .. } => "Mutate",
            PlanOp::Project { .. } => "Project",
            PlanOp::Aggregate { .. } => "Aggregate",
            PlanOp::Distinct { .. } => "Distinct",
            PlanOp::Sort { .. } => "Sort",
            PlanOp::Skip { .. } => "Skip",
            PlanOp::Limit { .. } => "Limit",
        }
    }

    pub fn children(&self) -> Vec<&PlanOp> {
        match self {
            PlanOp::Argument | PlanOp::Outer | PlanOp::NodeScan(_) => Vec::new(),
            PlanOp::CrossProduct { left, right } => vec![&**left, &**right],
            PlanOp::Optional { input, inner } => vec![&**input, &**inner],
            PlanOp::Expand { input, .. }
            | PlanOp::Filter { input, .. }
            | PlanOp::Flatten { input, .. }
            | PlanOp::Unwind { input, .. }
            | PlanOp::Mutate { input, .. }
            | PlanOp::Project { input, .. }
            | PlanOp::Aggregate { input, .. }
            | PlanOp::Distinct { input, .. }
            | PlanOp::Sort { input, .. }
            | PlanOp::Skip { input, .. }
            | PlanOp::Limit { input, .. } => vec![&**input],
        }
    }

    /// Pre-order search.
    pub fn find(&self, pred: &dyn Fn(&PlanOp) -> bool) -> Option<&PlanOp> {
        if pred(self) {
            return Some(self);
        }
        self.children().into_iter().find_map(|c| c.find(pred))
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, slots: &[SlotInfo], depth: usize) -> fmt::Result {
        let name = |slot: usize| slots.get(slot).map_or("?", |s| s.name.as_str());
        write!(f, "{:indent$}{}", "", self.name(), indent = depth * 2)?;
        match self {
            PlanOp::NodeScan(scan) => {
                write!(f, " {}", name(scan.slot))?;
                for label in &scan.labels {
                    write!(f, ":{label}")?;
                }
                for p in &scan.predicates {
                    write!(f, " [{} {} {}]", p.key, p.op.symbol(), p.value.display_name())?;
                }
            }
            PlanOp::Expand { hop, mode, .. } => {
                let arrow = match hop.direction {
                    Direction::Outgoing => "->",
                    Direction::Incoming => "<-",
                    Direction::Both => "--",
                };
                write!(f, " ({}){arrow}({})", name(hop.from), name(hop.to))?;
                if !hop.types.is_empty() {
                    write!(f, " :{}", hop.types.join("|"))?;
                }
                if let Some((min, max)) = hop.var_length {
                    write!(f, " *{min}..{max}")?;
                }
                if hop.into {
                    write!(f, " into")?;
                }
                write!(f, " {mode:?}")?;
            }
            PlanOp::Unwind { expr, slot, .. } => {
                write!(f, " {} AS {}", expr.display_name(), name(*slot))?;
            }
            PlanOp::Filter { depth: level, .. } if *level > 0 => {
                write!(f, " depth={level}")?;
            }
            PlanOp::Aggregate { keys, aggregates, levels, depth: needed, .. } => {
                write!(f, " keys={} aggregates={}", keys.len(), aggregates.len())?;
                if !levels.is_empty() {
                    write!(f, " factorized depth={needed}/{}", levels.len())?;
                }
            }
            _ => {}
        }
        writeln!(f)?;
        for child in self.children() {
            child.fmt_tree(f, slots, depth + 1)?;
        }
        Ok(())
    }
}

/// A compiled statement.
#[derive(Debug, Clone)]
pub struct Plan {
    pub root: PlanOp,
    pub slots: Vec<SlotInfo>,
    /// Output column names, in order.
    pub columns: Vec<String>,
    /// Slot holding each output column.
    pub column_slots: Vec<usize>,
    pub start_variables: Vec<String>,
}

impl Plan {
    pub fn width(&self) -> usize {
        self.slots.len()
    }

    pub fn is_read_only(&self) -> bool {
        self.root.find(&|op| matches!(op, PlanOp::Mutate { .. })).is_none()
    }

    /// Whether any expand keeps its neighbors factorized.
    pub fn is_factorized(&self) -> bool {
        self.root
            .find(&|op| matches!(op, PlanOp::Expand { mode, .. } if *mode != ExpandMode::Flat))
            .is_some()
    }

    pub fn contains(&self, op_name: &str) -> bool {
        self.root.find(&|op| op.name() == op_name).is_some()
    }

    /// Expand modes in pipeline order (innermost first).
    pub fn expand_modes(&self) -> Vec<ExpandMode> {
        fn walk(op: &PlanOp, out: &mut Vec<ExpandMode>) {
            for child in op.children() {
                walk(child, out);
            }
            if let PlanOp::Expand { mode, .. } = op {
                out.push(*mode);
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut out);
        out
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.fmt_tree(f, &self.slots, 0)
    }
}
