//! Binding rows, flat and factorized.
//!
//! A flat [`Row`] is a fixed-width vector of [`Slot`]s, one per plan slot.
//! A factorized [`FRow`] is a flat prefix plus a tree of neighbor groups:
//! level 1 holds the matches of the first factorized hop, each of which
//! owns the group of its own extensions, and so on. The flat rows an FRow
//! stands for are every root-to-leaf path through the tree.

use smallvec::SmallVec;

use crate::model::{EdgeId, NodeId, Value};
use crate::planner::FactorLevel;
use crate::{Result, RuntimeError};

/// One bound value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Slot {
    #[default]
    Empty,
    Node(NodeId),
    Edge(EdgeId),
    /// Edges of a variable-length hop, in traversal order.
    Path(Vec<EdgeId>),
    Value(Value),
}

impl Slot {
    /// The value a variable evaluates to. Graph elements become their ids.
    pub fn to_value(&self) -> Value {
        match self {
            Slot::Empty => Value::Null,
            Slot::Node(id) => Value::Int(id.0 as i64),
            Slot::Edge(id) => Value::Int(id.0 as i64),
            Slot::Path(edges) => Value::List(edges.iter().map(|e| Value::Int(e.0 as i64)).collect()),
            Slot::Value(v) => v.clone(),
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Slot::Node(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_edge(&self) -> Option<EdgeId> {
        match self {
            Slot::Edge(id) => Some(*id),
            _ => None,
        }
    }
}

pub type Row = SmallVec<[Slot; 8]>;

pub fn empty_row(width: usize) -> Row {
    SmallVec::from_elem(Slot::Empty, width)
}

/// One match at a factor level.
#[derive(Debug, Clone)]
pub struct FactorEntry {
    pub edge: Slot,
    pub node: NodeId,
    /// Extensions of this match at the next level, if one exists.
    pub child: Option<FactorGroup>,
}

#[derive(Debug, Clone)]
pub enum FactorGroup {
    Materialized(Vec<FactorEntry>),
    /// An unexpanded last hop; only its match count is known.
    Deferred(u64),
}

impl FactorGroup {
    /// Number of flat rows the group stands for.
    pub fn multiplicity(&self) -> u64 {
        match self {
            FactorGroup::Materialized(entries) => entries
                .iter()
                .map(|e| e.child.as_ref().map_or(1, FactorGroup::multiplicity))
                .fold(0u64, u64::saturating_add),
            FactorGroup::Deferred(n) => *n,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FactorGroup::Materialized(entries) => entries.is_empty(),
            FactorGroup::Deferred(n) => *n == 0,
        }
    }
}

/// A prefix binding with an optional factorized tail.
#[derive(Debug, Clone)]
pub struct FRow {
    pub prefix: Row,
    pub tail: Option<FactorGroup>,
}

impl FRow {
    pub fn flat(prefix: Row) -> Self {
        Self { prefix, tail: None }
    }

    pub fn multiplicity(&self) -> u64 {
        self.tail.as_ref().map_or(1, FactorGroup::multiplicity)
    }

    /// Visits every partial binding with levels `1..=depth` bound, together
    /// with the number of flat rows below it. Levels past `depth` stay
    /// unbound; a deferred level never binds its slots.
    pub fn walk(
        &self,
        levels: &[FactorLevel],
        depth: usize,
        visit: &mut dyn FnMut(&Row, u64) -> Result<()>,
    ) -> Result<()> {
        match &self.tail {
            Some(group) if depth > 0 => {
                let mut row = self.prefix.clone();
                walk_group(group, levels, 1, depth, &mut row, visit)
            }
            _ => visit(&self.prefix, self.multiplicity()),
        }
    }

    /// Drops every level-`depth` entry for which `keep` returns false, then
    /// any ancestor left without extensions. Returns whether anything is
    /// left.
    pub fn retain(
        &mut self,
        levels: &[FactorLevel],
        depth: usize,
        keep: &mut dyn FnMut(&Row) -> Result<bool>,
    ) -> Result<bool> {
        match self.tail.as_mut() {
            Some(group) if depth > 0 => {
                let mut row = self.prefix.clone();
                retain_group(group, levels, 1, depth, &mut row, keep)
            }
            _ => keep(&self.prefix),
        }
    }

    /// Replaces each level-`depth` leaf with the group `expand` returns for
    /// it (`depth == 0` extends the prefix). Leaves whose group comes back
    /// empty are pruned along with emptied ancestors. Returns whether
    /// anything is left.
    pub fn extend(
        &mut self,
        levels: &[FactorLevel],
        depth: usize,
        expand: &mut dyn FnMut(&Row) -> Result<FactorGroup>,
    ) -> Result<bool> {
        if depth == 0 {
            let group = expand(&self.prefix)?;
            let alive = !group.is_empty();
            self.tail = Some(group);
            return Ok(alive);
        }
        match self.tail.as_mut() {
            Some(group) => {
                let mut row = self.prefix.clone();
                extend_group(group, levels, 1, depth, &mut row, expand)
            }
            None => Err(RuntimeError::TypeMismatch {
                context: "factorized expand".into(),
                expected: "factor group".into(),
                got: "flat row".into(),
            }
            .into()),
        }
    }

    /// Every flat row, each repeated by its deferred multiplicity.
    pub fn flatten(&self, levels: &[FactorLevel], out: &mut Vec<Row>) -> Result<()> {
        self.walk(levels, levels.len(), &mut |row, m| {
            for _ in 0..m {
                out.push(row.clone());
            }
            Ok(())
        })
    }
}

fn bind(row: &mut Row, level: &FactorLevel, entry: &FactorEntry) {
    row[level.edge_slot] = entry.edge.clone();
    row[level.node_slot] = Slot::Node(entry.node);
}

fn unbind(row: &mut Row, level: &FactorLevel) {
    row[level.edge_slot] = Slot::Empty;
    row[level.node_slot] = Slot::Empty;
}

fn walk_group(
    group: &FactorGroup,
    levels: &[FactorLevel],
    level: usize,
    depth: usize,
    row: &mut Row,
    visit: &mut dyn FnMut(&Row, u64) -> Result<()>,
) -> Result<()> {
    if level > depth {
        return visit(row, group.multiplicity());
    }
    match group {
        FactorGroup::Materialized(entries) => {
            for entry in entries {
                bind(row, &levels[level - 1], entry);
                match &entry.child {
                    Some(child) => walk_group(child, levels, level + 1, depth, row, visit)?,
                    None => visit(row, 1)?,
                }
            }
            Ok(())
        }
        FactorGroup::Deferred(n) => {
            unbind(row, &levels[level - 1]);
            visit(row, *n)
        }
    }
}

fn retain_group(
    group: &mut FactorGroup,
    levels: &[FactorLevel],
    level: usize,
    depth: usize,
    row: &mut Row,
    keep: &mut dyn FnMut(&Row) -> Result<bool>,
) -> Result<bool> {
    let entries = match group {
        FactorGroup::Materialized(entries) => entries,
        FactorGroup::Deferred(n) => return Ok(*n > 0),
    };
    let mut kept = Vec::with_capacity(entries.len());
    for mut entry in entries.drain(..) {
        bind(row, &levels[level - 1], &entry);
        let alive = if level == depth {
            keep(row)?
        } else {
            match entry.child.as_mut() {
                Some(child) => retain_group(child, levels, level + 1, depth, row, keep)?,
                None => keep(row)?,
            }
        };
        if alive {
            kept.push(entry);
        }
    }
    *entries = kept;
    Ok(!entries.is_empty())
}

fn extend_group(
    group: &mut FactorGroup,
    levels: &[FactorLevel],
    level: usize,
    depth: usize,
    row: &mut Row,
    expand: &mut dyn FnMut(&Row) -> Result<FactorGroup>,
) -> Result<bool> {
    let entries = match group {
        FactorGroup::Materialized(entries) => entries,
        FactorGroup::Deferred(n) => return Ok(*n > 0),
    };
    let mut kept = Vec::with_capacity(entries.len());
    for mut entry in entries.drain(..) {
        bind(row, &levels[level - 1], &entry);
        let alive = if level == depth {
            let child = expand(row)?;
            let alive = !child.is_empty();
            entry.child = Some(child);
            alive
        } else {
            match entry.child.as_mut() {
                Some(child) => extend_group(child, levels, level + 1, depth, row, expand)?,
                None => false,
            }
        };
        if alive {
            kept.push(entry);
        }
    }
    *entries = kept;
    Ok(!entries.is_empty())
}
