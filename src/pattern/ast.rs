//! Pattern AST
//!
//! The canonical statement form every query front end produces. Pure data:
//! no behavior, no storage references, no execution logic.

use crate::model::Value;

/// One statement: read pattern, optional mutations, optional projection.
///
/// Clauses run in this order: the WITH-terminated `parts`, then
/// MATCH/WHERE, OPTIONAL MATCH and UNWIND, CREATE, MERGE, SET, REMOVE,
/// DELETE, then RETURN/ORDER BY/SKIP/LIMIT over the post-mutation graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    /// Read-only query parts, each closed by a WITH.
    pub parts: Vec<QueryPart>,
    /// Comma-joined path chains; disconnected chains form a cross product.
    pub matches: Vec<Pattern>,
    pub where_clause: Option<Expr>,
    /// OPTIONAL MATCH and UNWIND clauses after `matches`, in order.
    pub reading: Vec<ReadingClause>,
    pub create: Vec<Pattern>,
    pub merge: Option<MergeClause>,
    pub set: Vec<SetItem>,
    pub remove: Vec<RemoveItem>,
    pub delete: Option<DeleteClause>,
    pub return_clause: Option<ReturnClause>,
    pub order_by: Vec<OrderExpr>,
    pub skip: Option<Expr>,
    pub limit: Option<Expr>,
}

/// `MATCH ... WITH ...`: a read-only prefix of a statement. Only the
/// WITH projection stays visible to the clauses after it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPart {
    pub matches: Vec<Pattern>,
    pub where_clause: Option<Expr>,
    pub reading: Vec<ReadingClause>,
    pub with: WithClause,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadingClause {
    /// Left-outer match: rows without a match keep the new variables null.
    OptionalMatch { patterns: Vec<Pattern>, where_clause: Option<Expr> },
    /// One row per list element, bound to `variable`.
    Unwind { expr: Expr, variable: String },
}

/// `WITH [DISTINCT] items [ORDER BY] [SKIP] [LIMIT] [WHERE]`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WithClause {
    pub projection: ReturnClause,
    pub order_by: Vec<OrderExpr>,
    pub skip: Option<Expr>,
    pub limit: Option<Expr>,
    /// Filters the projected rows.
    pub where_clause: Option<Expr>,
}

/// A path chain: `(a:Person)-[:KNOWS]->(b)<-[:LIKES]-(c)`.
///
/// Elements alternate node, edge, node, ...
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pattern {
    pub elements: Vec<PatternElement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatternElement {
    Node(NodePattern),
    Edge(EdgePattern),
}

/// Node pattern: `(var:Label1:Label2 {key: expr})`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePattern {
    pub variable: Option<String>,
    pub labels: Vec<String>,
    pub properties: Vec<(String, Expr)>,
}

/// Edge pattern: `-[var:TYPE1|TYPE2 *min..max {key: expr}]->`
#[derive(Debug, Clone, PartialEq)]
pub struct EdgePattern {
    pub variable: Option<String>,
    /// Accepted edge types; empty accepts any.
    pub types: Vec<String>,
    pub direction: PatternDirection,
    pub properties: Vec<(String, Expr)>,
    pub var_length: Option<VarLength>,
    /// Let a repetition revisit nodes already on its path.
    pub allow_repeated_nodes: bool,
}

/// Pattern direction, read left to right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternDirection {
    /// ->
    Right,
    /// <-
    Left,
    /// - (either way)
    Both,
}

/// Repetition bounds. `min` defaults to 1; `max` to the configured ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarLength {
    pub min: Option<usize>,
    pub max: Option<usize>,
}

/// RETURN clause.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReturnClause {
    pub distinct: bool,
    pub items: Vec<ReturnItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

/// ORDER BY key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderExpr {
    pub expr: Expr,
    pub ascending: bool,
    pub nulls: NullsOrder,
}

/// Placement of nulls in ORDER BY. By default nulls sort last ascending
/// and first descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullsOrder {
    #[default]
    Default,
    First,
    Last,
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// `n`, `r`
    Variable(String),
    /// `n.name`; absent properties evaluate to null.
    Property { expr: Box<Expr>, key: String },
    /// `n.name!`; absent properties are an error.
    RequiredProperty { expr: Box<Expr>, key: String },
    /// `$name`
    Parameter(String),
    /// `count(n)`, `id(n)`, `sum(DISTINCT x)`
    FunctionCall { name: String, args: Vec<Expr>, distinct: bool },
    BinaryOp { left: Box<Expr>, op: BinaryOp, right: Box<Expr> },
    UnaryOp { op: UnaryOp, expr: Box<Expr> },
    List(Vec<Expr>),
    Case { operand: Option<Box<Expr>>, whens: Vec<(Expr, Expr)>, else_expr: Option<Box<Expr>> },
    /// `x IN [1, 2, 3]`
    In { expr: Box<Expr>, list: Box<Expr> },
    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },
    /// `n:Person`
    HasLabel { expr: Box<Expr>, label: String },
    StringOp { left: Box<Expr>, op: StringOp, right: Box<Expr> },
    /// `*` in RETURN or `count(*)`
    Star,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add, Sub, Mul, Div, Mod, Pow,
    // Comparison
    Eq, Neq, Lt, Lte, Gt, Gte,
    // Logical
    And, Or, Xor,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::Neq | BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Xor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    StartsWith,
    EndsWith,
    Contains,
}

// ============================================================================
// Write clauses
// ============================================================================

/// MERGE of a single node pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeClause {
    pub pattern: Pattern,
    pub on_create: Vec<SetItem>,
    pub on_match: Vec<SetItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteClause {
    pub variables: Vec<String>,
    pub detach: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetItem {
    /// SET n.key = expr
    Property { variable: String, key: String, value: Expr },
    /// SET n += {key: expr, ...}
    MergeProperties { variable: String, properties: Vec<(String, Expr)> },
    /// SET n:Label
    Label { variable: String, label: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoveItem {
    /// REMOVE n.key
    Property { variable: String, key: String },
    /// REMOVE n:Label
    Label { variable: String, label: String },
}
