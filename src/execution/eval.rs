//! Expression evaluation over a binding row.
//!
//! Null handling is three-valued: comparisons and arithmetic with a null
//! operand yield null, `AND`/`OR` follow Kleene logic, and a filter keeps a
//! row only when its predicate is exactly `true`.

use crate::model::{EdgeId, NodeId, Value};
use crate::pattern::{BinaryOp, Expr, StringOp, UnaryOp};
use crate::planner::Layout;
use crate::storage::CmpOp;
use crate::{CompileError, Result, RuntimeError};

use super::context::ExecContext;
use super::row::{Row, Slot};

fn mismatch(context: impl Into<String>, expected: &str, got: &Value) -> RuntimeError {
    RuntimeError::TypeMismatch {
        context: context.into(),
        expected: expected.to_string(),
        got: got.type_name().to_string(),
    }
}

/// A graph element an expression refers to.
enum Element<'r> {
    Node(NodeId),
    Edge(EdgeId),
    Path(&'r [EdgeId]),
}

pub struct Evaluator<'c, 'a> {
    pub ctx: &'c ExecContext<'a>,
    pub layout: &'c Layout,
}

impl<'c, 'a> Evaluator<'c, 'a> {
    pub fn new(ctx: &'c ExecContext<'a>, layout: &'c Layout) -> Self {
        Self { ctx, layout }
    }

    fn slot<'r>(&self, row: &'r Row, name: &str) -> Result<&'r Slot> {
        let index = self
            .layout
            .get(name)
            .copied()
            .ok_or_else(|| CompileError::UnboundVariable(name.to_string()))?;
        Ok(row.get(index).unwrap_or(&Slot::Empty))
    }

    /// Resolves `expr` to a graph element when it is a bound variable.
    fn element<'r>(&self, expr: &Expr, row: &'r Row) -> Result<Option<Element<'r>>> {
        let Expr::Variable(name) = expr else { return Ok(None) };
        Ok(match self.slot(row, name)? {
            Slot::Node(id) => Some(Element::Node(*id)),
            Slot::Edge(id) => Some(Element::Edge(*id)),
            Slot::Path(edges) => Some(Element::Path(edges)),
            _ => None,
        })
    }

    /// Predicate truth: `true` keeps the row, `false`/null drop it.
    pub fn truth(&self, expr: &Expr, row: &Row) -> Result<bool> {
        match self.eval(expr, row)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(mismatch("predicate", "BOOLEAN", &other).into()),
        }
    }

    pub fn eval(&self, expr: &Expr, row: &Row) -> Result<Value> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Variable(name) => Ok(self.slot(row, name)?.to_value()),
            Expr::Parameter(name) => self
                .ctx
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| RuntimeError::MissingParameter(name.clone()).into()),
            Expr::Property { expr, key } => self.property(expr, key, row, false),
            Expr::RequiredProperty { expr, key } => self.property(expr, key, row, true),
            Expr::FunctionCall { name, args, .. } => self.call(name, args, row),
            Expr::BinaryOp { left, op, right } => self.binary(left, *op, right, row),
            Expr::UnaryOp { op, expr } => {
                let v = self.eval(expr, row)?;
                match (op, v) {
                    (_, Value::Null) => Ok(Value::Null),
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Negate, Value::Int(i)) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| RuntimeError::Overflow(format!("-({i})")).into()),
                    (UnaryOp::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
                    (UnaryOp::Not, other) => Err(mismatch("NOT", "BOOLEAN", &other).into()),
                    (UnaryOp::Negate, other) => Err(mismatch("negation", "number", &other).into()),
                }
            }
            Expr::List(items) => {
                let values = items.iter().map(|i| self.eval(i, row)).collect::<Result<_>>()?;
                Ok(Value::List(values))
            }
            Expr::Case { operand, whens, else_expr } => {
                let subject = match operand {
                    Some(o) => Some(self.eval(o, row)?),
                    None => None,
                };
                for (when, then) in whens {
                    let hit = match &subject {
                        Some(s) => s.equals(&self.eval(when, row)?) == Some(true),
                        None => self.truth(when, row)?,
                    };
                    if hit {
                        return self.eval(then, row);
                    }
                }
                match else_expr {
                    Some(e) => self.eval(e, row),
                    None => Ok(Value::Null),
                }
            }
            Expr::In { expr, list } => {
                let needle = self.eval(expr, row)?;
                let haystack = match self.eval(list, row)? {
                    Value::List(items) => items,
                    Value::Null => return Ok(Value::Null),
                    other => return Err(mismatch("IN", "LIST", &other).into()),
                };
                let mut unknown = false;
                for item in &haystack {
                    match needle.equals(item) {
                        Some(true) => return Ok(Value::Bool(true)),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                Ok(if unknown { Value::Null } else { Value::Bool(false) })
            }
            Expr::IsNull { expr, negated } => {
                let is_null = self.eval(expr, row)?.is_null();
                Ok(Value::Bool(is_null != *negated))
            }
            Expr::HasLabel { expr, label } => match self.element(expr, row)? {
                Some(Element::Node(id)) => Ok(Value::Bool(self.ctx.graph.has_label(id, label))),
                Some(_) => Ok(Value::Bool(false)),
                None => match self.eval(expr, row)? {
                    Value::Null => Ok(Value::Null),
                    other => Err(mismatch("label check", "node", &other).into()),
                },
            },
            Expr::StringOp { left, op, right } => {
                let (l, r) = (self.eval(left, row)?, self.eval(right, row)?);
                match (&l, &r) {
                    (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
                    (Value::String(a), Value::String(b)) => Ok(Value::Bool(match op {
                        StringOp::StartsWith => a.starts_with(b.as_str()),
                        StringOp::EndsWith => a.ends_with(b.as_str()),
                        StringOp::Contains => a.contains(b.as_str()),
                    })),
                    (Value::String(_), other) | (other, _) => {
                        Err(mismatch("string operator", "STRING", other).into())
                    }
                }
            }
            Expr::Star => Err(CompileError::Unsupported("'*' outside RETURN or count(*)".into()).into()),
        }
    }

    fn property(&self, base: &Expr, key: &str, row: &Row, required: bool) -> Result<Value> {
        let graph = self.ctx.graph;
        let value = match self.element(base, row)? {
            Some(Element::Node(id)) => graph.node_property(id, key).cloned(),
            Some(Element::Edge(id)) => graph.edge_property(id, key).cloned(),
            Some(Element::Path(_)) => {
                return Err(RuntimeError::TypeMismatch {
                    context: format!("property access '.{key}'"),
                    expected: "node or edge".into(),
                    got: "path".into(),
                }
                .into());
            }
            None => match self.eval(base, row)? {
                Value::Null => None,
                other => return Err(mismatch(format!("property access '.{key}'"), "node or edge", &other).into()),
            },
        };
        match value {
            Some(v) => Ok(v),
            None if required => Err(RuntimeError::MissingProperty {
                variable: base.display_name(),
                key: key.to_string(),
            }
            .into()),
            None => Ok(Value::Null),
        }
    }

    fn binary(&self, left: &Expr, op: BinaryOp, right: &Expr, row: &Row) -> Result<Value> {
        if op.is_logical() {
            let l = self.logical_operand(left, op, row)?;
            // Short-circuit where the result no longer depends on the right side.
            match (op, l) {
                (BinaryOp::And, Some(false)) => return Ok(Value::Bool(false)),
                (BinaryOp::Or, Some(true)) => return Ok(Value::Bool(true)),
                _ => {}
            }
            let r = self.logical_operand(right, op, row)?;
            let out = match op {
                BinaryOp::And => match (l, r) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                },
                BinaryOp::Or => match (l, r) {
                    (Some(true), _) | (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                },
                _ => match (l, r) {
                    (Some(a), Some(b)) => Some(a != b),
                    _ => None,
                },
            };
            return Ok(out.map_or(Value::Null, Value::Bool));
        }

        let (l, r) = (self.eval(left, row)?, self.eval(right, row)?);
        if op.is_comparison() {
            let cmp = match op {
                BinaryOp::Eq => CmpOp::Eq,
                BinaryOp::Neq => CmpOp::Ne,
                BinaryOp::Lt => CmpOp::Lt,
                BinaryOp::Lte => CmpOp::Le,
                BinaryOp::Gt => CmpOp::Gt,
                _ => CmpOp::Ge,
            };
            return Ok(cmp.apply(&l, &r)?.map_or(Value::Null, Value::Bool));
        }
        arithmetic(op, l, r)
    }

    fn logical_operand(&self, expr: &Expr, op: BinaryOp, row: &Row) -> Result<Option<bool>> {
        match self.eval(expr, row)? {
            Value::Bool(b) => Ok(Some(b)),
            Value::Null => Ok(None),
            other => Err(mismatch(format!("{op:?}"), "BOOLEAN", &other).into()),
        }
    }

    fn call(&self, name: &str, args: &[Expr], row: &Row) -> Result<Value> {
        let lower = name.to_ascii_lowercase();
        let graph = self.ctx.graph;
        let arg = |i: usize| nth_arg(name, args, i);

        match lower.as_str() {
            "id" => match self.element(arg(0)?, row)? {
                Some(Element::Node(id)) => Ok(Value::Int(id.0 as i64)),
                Some(Element::Edge(id)) => Ok(Value::Int(id.0 as i64)),
                _ => self.eval(arg(0)?, row),
            },
            "labels" => match self.element(arg(0)?, row)? {
                Some(Element::Node(id)) => {
                    let mut labels: Vec<String> =
                        graph.labels(id).map(|l| l.iter().cloned().collect()).unwrap_or_default();
                    labels.sort();
                    Ok(Value::List(labels.into_iter().map(Value::String).collect()))
                }
                _ => self.null_or_mismatch(arg(0)?, row, "labels()", "node"),
            },
            "type" => match self.element(arg(0)?, row)? {
                Some(Element::Edge(id)) => Ok(graph.edge_type(id).map_or(Value::Null, Value::from)),
                _ => self.null_or_mismatch(arg(0)?, row, "type()", "edge"),
            },
            "keys" => {
                let map = match self.element(arg(0)?, row)? {
                    Some(Element::Node(id)) => graph.node_properties(id),
                    Some(Element::Edge(id)) => graph.edge_properties(id),
                    _ => return self.null_or_mismatch(arg(0)?, row, "keys()", "node or edge"),
                };
                let mut keys: Vec<String> = map.into_keys().collect();
                keys.sort();
                Ok(Value::List(keys.into_iter().map(Value::String).collect()))
            }
            "startnode" | "endnode" => match self.element(arg(0)?, row)? {
                Some(Element::Edge(id)) => Ok(graph.edge_endpoints(id).map_or(Value::Null, |(src, dst)| {
                    let node = if lower == "startnode" { src } else { dst };
                    Value::Int(node.0 as i64)
                })),
                _ => self.null_or_mismatch(arg(0)?, row, name, "edge"),
            },
            "length" => match self.element(arg(0)?, row)? {
                Some(Element::Path(edges)) => Ok(Value::Int(edges.len() as i64)),
                Some(Element::Edge(_)) => Ok(Value::Int(1)),
                _ => self.size(self.eval(arg(0)?, row)?, name),
            },
            "size" => self.size(self.eval(arg(0)?, row)?, name),
            "coalesce" => {
                for a in args {
                    let v = self.eval(a, row)?;
                    if !v.is_null() {
                        return Ok(v);
                    }
                }
                Ok(Value::Null)
            }
            "toupper" | "tolower" => match self.eval(arg(0)?, row)? {
                Value::Null => Ok(Value::Null),
                Value::String(s) if lower == "toupper" => Ok(Value::String(s.to_uppercase())),
                Value::String(s) => Ok(Value::String(s.to_lowercase())),
                other => Err(mismatch(format!("{name}()"), "STRING", &other).into()),
            },
            "tostring" => Ok(match self.eval(arg(0)?, row)? {
                Value::Null => Value::Null,
                Value::String(s) => Value::String(s),
                other => Value::String(other.to_string()),
            }),
            "tointeger" => Ok(match self.eval(arg(0)?, row)? {
                Value::Int(i) => Value::Int(i),
                Value::Float(f) if f.is_finite() && f.abs() < 9.2e18 => Value::Int(f.trunc() as i64),
                Value::String(s) => s.trim().parse::<i64>().map_or(Value::Null, Value::Int),
                Value::Bool(b) => Value::Int(i64::from(b)),
                _ => Value::Null,
            }),
            "tofloat" => Ok(match self.eval(arg(0)?, row)? {
                Value::Int(i) => Value::Float(i as f64),
                Value::Float(f) => Value::Float(f),
                Value::String(s) => s.trim().parse::<f64>().map_or(Value::Null, Value::Float),
                _ => Value::Null,
            }),
            "abs" => match self.eval(arg(0)?, row)? {
                Value::Null => Ok(Value::Null),
                Value::Int(i) => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| RuntimeError::Overflow(format!("abs({i})")).into()),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(mismatch("abs()", "number", &other).into()),
            },
            _ => Err(RuntimeError::UnknownFunction(name.to_string()).into()),
        }
    }

    fn size(&self, value: Value, name: &str) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::List(items) => Ok(Value::Int(items.len() as i64)),
            Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
            other => Err(mismatch(format!("{name}()"), "LIST or STRING", &other).into()),
        }
    }

    fn null_or_mismatch(&self, expr: &Expr, row: &Row, context: &str, expected: &str) -> Result<Value> {
        match self.eval(expr, row)? {
            Value::Null => Ok(Value::Null),
            other => Err(mismatch(context, expected, &other).into()),
        }
    }
}

fn nth_arg<'e>(name: &str, args: &'e [Expr], i: usize) -> Result<&'e Expr> {
    args.get(i).ok_or_else(|| {
        RuntimeError::TypeMismatch {
            context: format!("{name}()"),
            expected: format!("{} argument(s)", i + 1),
            got: format!("{} argument(s)", args.len()),
        }
        .into()
    })
}

/// `+ - * / % ^` over two values.
pub fn arithmetic(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    let overflow = |l: &Value, r: &Value| RuntimeError::Overflow(format!("{l} {op:?} {r}"));
    match (l, r) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(a), Value::Int(b)) => {
            let out = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div | BinaryOp::Mod if b == 0 => return Err(RuntimeError::DivisionByZero.into()),
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Mod => a.checked_rem(b),
                _ => return Ok(Value::Float((a as f64).powf(b as f64))),
            };
            out.map(Value::Int).ok_or_else(|| overflow(&Value::Int(a), &Value::Int(b)).into())
        }
        (Value::String(a), Value::String(b)) if op == BinaryOp::Add => Ok(Value::String(a + &b)),
        (Value::List(mut a), Value::List(b)) if op == BinaryOp::Add => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (Value::List(mut a), item) if op == BinaryOp::Add => {
            a.push(item);
            Ok(Value::List(a))
        }
        (l, r) => {
            let (Some(a), Some(b)) = (l.as_float(), r.as_float()) else {
                let bad = if l.is_numeric() { r } else { l };
                return Err(mismatch(format!("arithmetic {op:?}"), "number", &bad).into());
            };
            Ok(Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Mod => a % b,
                _ => a.powf(b),
            }))
        }
    }
}
