//! # Pattern Language
//!
//! The canonical statement form ([`Statement`]) shared by every front end,
//! plus builder helpers for constructing statements in code.
//!
//! Front ends implement [`QueryFrontend`]: text in, `Statement` out. The
//! engine never knows which front end produced a statement.

pub mod ast;

pub use ast::*;

use crate::model::{PropertyMap, Value};
use crate::Result;

/// A query language front end.
pub trait QueryFrontend: Send + Sync {
    /// Language name, used in logs.
    fn name(&self) -> &str;

    /// Translates query text into a statement. Parameters are available
    /// for front ends that resolve them at translation time; `$name`
    /// references may also be left in the statement for execution.
    fn translate(&self, text: &str, params: &PropertyMap) -> Result<Statement>;
}

// ============================================================================
// Builders
// ============================================================================

impl NodePattern {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn var(name: impl Into<String>) -> Self {
        Self { variable: Some(name.into()), ..Self::default() }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    /// Inline equality constraint `{key: value}`.
    pub fn prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.push((key.into(), Expr::lit(value)));
        self
    }

    pub fn prop_expr(mut self, key: impl Into<String>, value: Expr) -> Self {
        self.properties.push((key.into(), value));
        self
    }
}

impl EdgePattern {
    pub fn new(direction: PatternDirection) -> Self {
        Self {
            variable: None,
            types: Vec::new(),
            direction,
            properties: Vec::new(),
            var_length: None,
            allow_repeated_nodes: false,
        }
    }

    /// `-[]->`
    pub fn out() -> Self {
        Self::new(PatternDirection::Right)
    }

    /// `<-[]-`
    pub fn incoming() -> Self {
        Self::new(PatternDirection::Left)
    }

    /// `-[]-`
    pub fn undirected() -> Self {
        Self::new(PatternDirection::Both)
    }

    pub fn var(mut self, name: impl Into<String>) -> Self {
        self.variable = Some(name.into());
        self
    }

    pub fn edge_type(mut self, edge_type: impl Into<String>) -> Self {
        self.types.push(edge_type.into());
        self
    }

    pub fn prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.push((key.into(), Expr::lit(value)));
        self
    }

    /// `*min..max`
    pub fn hops(mut self, min: usize, max: usize) -> Self {
        self.var_length = Some(VarLength { min: Some(min), max: Some(max) });
        self
    }

    /// `*min..` / `*..max` / `*`
    pub fn hops_range(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.var_length = Some(VarLength { min, max });
        self
    }

    pub fn allow_repeated_nodes(mut self) -> Self {
        self.allow_repeated_nodes = true;
        self
    }
}

impl Pattern {
    pub fn start(node: NodePattern) -> Self {
        Self { elements: vec![PatternElement::Node(node)] }
    }

    /// Extends the chain by one hop.
    pub fn then(mut self, edge: EdgePattern, node: NodePattern) -> Self {
        self.elements.push(PatternElement::Edge(edge));
        self.elements.push(PatternElement::Node(node));
        self
    }
}

impl ReturnItem {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

impl From<Expr> for ReturnItem {
    fn from(expr: Expr) -> Self {
        ReturnItem::new(expr)
    }
}

impl OrderExpr {
    pub fn asc(expr: Expr) -> Self {
        Self { expr, ascending: true, nulls: NullsOrder::Default }
    }

    pub fn desc(expr: Expr) -> Self {
        Self { expr, ascending: false, nulls: NullsOrder::Default }
    }

    pub fn nulls(mut self, nulls: NullsOrder) -> Self {
        self.nulls = nulls;
        self
    }
}

impl Statement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn match_pattern(mut self, pattern: Pattern) -> Self {
        self.matches.push(pattern);
        self
    }

    /// Adds a WHERE predicate, AND-ed with any existing one.
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn optional_match(mut self, patterns: Vec<Pattern>, predicate: Option<Expr>) -> Self {
        self.reading.push(ReadingClause::OptionalMatch { patterns, where_clause: predicate });
        self
    }

    pub fn unwind(mut self, expr: Expr, variable: impl Into<String>) -> Self {
        self.reading.push(ReadingClause::Unwind { expr, variable: variable.into() });
        self
    }

    /// Closes the reading clauses so far into a part ending in `with`.
    pub fn with(mut self, with: WithClause) -> Self {
        self.parts.push(QueryPart {
            matches: std::mem::take(&mut self.matches),
            where_clause: self.where_clause.take(),
            reading: std::mem::take(&mut self.reading),
            with,
        });
        self
    }

    pub fn create(mut self, pattern: Pattern) -> Self {
        self.create.push(pattern);
        self
    }

    pub fn merge(mut self, clause: MergeClause) -> Self {
        self.merge = Some(clause);
        self
    }

    pub fn set(mut self, item: SetItem) -> Self {
        self.set.push(item);
        self
    }

    pub fn remove(mut self, item: RemoveItem) -> Self {
        self.remove.push(item);
        self
    }

    pub fn delete<S: Into<String>>(mut self, variables: impl IntoIterator<Item = S>, detach: bool) -> Self {
        self.delete = Some(DeleteClause {
            variables: variables.into_iter().map(Into::into).collect(),
            detach,
        });
        self
    }

    pub fn returning<I: Into<ReturnItem>>(mut self, items: impl IntoIterator<Item = I>) -> Self {
        self.return_clause = Some(ReturnClause {
            distinct: false,
            items: items.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn returning_distinct<I: Into<ReturnItem>>(self, items: impl IntoIterator<Item = I>) -> Self {
        let mut stmt = self.returning(items);
        if let Some(ret) = stmt.return_clause.as_mut() {
            ret.distinct = true;
        }
        stmt
    }

    pub fn order_by(mut self, key: OrderExpr) -> Self {
        self.order_by.push(key);
        self
    }

    pub fn skip(mut self, n: i64) -> Self {
        self.skip = Some(Expr::lit(n));
        self
    }

    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(Expr::lit(n));
        self
    }

    /// Whether the statement changes the graph.
    pub fn has_mutations(&self) -> bool {
        !self.create.is_empty()
            || self.merge.is_some()
            || !self.set.is_empty()
            || !self.remove.is_empty()
            || self.delete.is_some()
    }
}

impl WithClause {
    pub fn new<I: Into<ReturnItem>>(items: impl IntoIterator<Item = I>) -> Self {
        Self {
            projection: ReturnClause { distinct: false, items: items.into_iter().map(Into::into).collect() },
            ..Self::default()
        }
    }

    pub fn distinct(mut self) -> Self {
        self.projection.distinct = true;
        self
    }

    pub fn filter(mut self, predicate: Expr) -> Self {
        self.where_clause = Some(predicate);
        self
    }

    pub fn order_by(mut self, key: OrderExpr) -> Self {
        self.order_by.push(key);
        self
    }

    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(Expr::lit(n));
        self
    }
}

impl Expr {
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Variable(name.into())
    }

    /// `var.key`
    pub fn prop(var: impl Into<String>, key: impl Into<String>) -> Self {
        Expr::Property { expr: Box::new(Expr::var(var)), key: key.into() }
    }

    /// `var.key!`
    pub fn required_prop(var: impl Into<String>, key: impl Into<String>) -> Self {
        Expr::RequiredProperty { expr: Box::new(Expr::var(var)), key: key.into() }
    }

    pub fn param(name: impl Into<String>) -> Self {
        Expr::Parameter(name.into())
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::FunctionCall { name: name.into(), args, distinct: false }
    }

    pub fn call_distinct(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::FunctionCall { name: name.into(), args, distinct: true }
    }

    /// `count(*)`
    pub fn count_star() -> Self {
        Expr::call("count", vec![Expr::Star])
    }

    pub fn binary(self, op: BinaryOp, right: Expr) -> Self {
        Expr::BinaryOp { left: Box::new(self), op, right: Box::new(right) }
    }

    pub fn equals(self, right: Expr) -> Self { self.binary(BinaryOp::Eq, right) }
    pub fn not_equals(self, right: Expr) -> Self { self.binary(BinaryOp::Neq, right) }
    pub fn less_than(self, right: Expr) -> Self { self.binary(BinaryOp::Lt, right) }
    pub fn less_or_equal(self, right: Expr) -> Self { self.binary(BinaryOp::Lte, right) }
    pub fn greater_than(self, right: Expr) -> Self { self.binary(BinaryOp::Gt, right) }
    pub fn greater_or_equal(self, right: Expr) -> Self { self.binary(BinaryOp::Gte, right) }
    pub fn and(self, right: Expr) -> Self { self.binary(BinaryOp::And, right) }
    pub fn or(self, right: Expr) -> Self { self.binary(BinaryOp::Or, right) }
    pub fn plus(self, right: Expr) -> Self { self.binary(BinaryOp::Add, right) }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Expr::UnaryOp { op: UnaryOp::Not, expr: Box::new(self) }
    }

    pub fn is_null(self) -> Self {
        Expr::IsNull { expr: Box::new(self), negated: false }
    }

    pub fn is_not_null(self) -> Self {
        Expr::IsNull { expr: Box::new(self), negated: true }
    }

    pub fn has_label(self, label: impl Into<String>) -> Self {
        Expr::HasLabel { expr: Box::new(self), label: label.into() }
    }

    /// Variables referenced anywhere in the expression.
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Variable(v) => {
                if !out.contains(&v.as_str()) {
                    out.push(v);
                }
            }
            Expr::Literal(_) | Expr::Parameter(_) | Expr::Star => {}
            Expr::Property { expr, .. }
            | Expr::RequiredProperty { expr, .. }
            | Expr::UnaryOp { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::HasLabel { expr, .. } => expr.collect_variables(out),
            Expr::FunctionCall { args, .. } => args.iter().for_each(|a| a.collect_variables(out)),
            Expr::BinaryOp { left, right, .. } | Expr::StringOp { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Expr::In { expr, list } => {
                expr.collect_variables(out);
                list.collect_variables(out);
            }
            Expr::List(items) => items.iter().for_each(|i| i.collect_variables(out)),
            Expr::Case { operand, whens, else_expr } => {
                if let Some(op) = operand {
                    op.collect_variables(out);
                }
                for (w, t) in whens {
                    w.collect_variables(out);
                    t.collect_variables(out);
                }
                if let Some(e) = else_expr {
                    e.collect_variables(out);
                }
            }
        }
    }

    /// Whether the expression contains an aggregate function call.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::FunctionCall { name, args, .. } => {
                is_aggregate_function(name) || args.iter().any(Expr::contains_aggregate)
            }
            Expr::Literal(_) | Expr::Variable(_) | Expr::Parameter(_) | Expr::Star => false,
            Expr::Property { expr, .. }
            | Expr::RequiredProperty { expr, .. }
            | Expr::UnaryOp { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::HasLabel { expr, .. } => expr.contains_aggregate(),
            Expr::BinaryOp { left, right, .. } | Expr::StringOp { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expr::In { expr, list } => expr.contains_aggregate() || list.contains_aggregate(),
            Expr::List(items) => items.iter().any(Expr::contains_aggregate),
            Expr::Case { operand, whens, else_expr } => {
                operand.as_deref().is_some_and(Expr::contains_aggregate)
                    || whens.iter().any(|(w, t)| w.contains_aggregate() || t.contains_aggregate())
                    || else_expr.as_deref().is_some_and(Expr::contains_aggregate)
            }
        }
    }

    /// Column name used when a RETURN item has no alias.
    pub fn display_name(&self) -> String {
        match self {
            Expr::Variable(v) => v.clone(),
            Expr::Property { expr, key } => format!("{}.{key}", expr.display_name()),
            Expr::RequiredProperty { expr, key } => format!("{}.{key}!", expr.display_name()),
            Expr::Parameter(p) => format!("${p}"),
            Expr::Literal(v) => v.to_string(),
            Expr::Star => "*".to_string(),
            Expr::FunctionCall { name, args, distinct } => {
                let args: Vec<String> = args.iter().map(Expr::display_name).collect();
                let prefix = if *distinct { "DISTINCT " } else { "" };
                format!("{name}({prefix}{})", args.join(", "))
            }
            _ => "expr".to_string(),
        }
    }
}

/// Names of the aggregate functions, lower-case.
pub const AGGREGATE_FUNCTIONS: &[&str] = &["count", "sum", "avg", "min", "max", "collect"];

pub fn is_aggregate_function(name: &str) -> bool {
    AGGREGATE_FUNCTIONS.iter().any(|f| f.eq_ignore_ascii_case(name))
}
