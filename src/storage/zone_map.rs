//! Per-chunk zone maps for predicate-based chunk skipping.
//!
//! A zone map summarizes one column chunk: the minimum and maximum non-null
//! value, whether any null (absent) slot exists, and the value class of the
//! non-null entries. A scan consults the zone map first and skips the chunk
//! when no row in it can satisfy the predicate.
//!
//! Zone maps only prune when the chunk holds a single comparable class and
//! the predicate literal is of that same class. Mixed chunks are always
//! scanned so row-level evaluation sees (and reports) type mismatches.
//!
//! NaN never takes part in the bounds. It satisfies `<>` against every
//! number, so a chunk holding one is never pruned for `<>`. Chunks mixing
//! integers and floats only prune while every integer involved converts to
//! a float exactly; past 2^53 the mixed ordering stops being transitive.

use std::cmp::Ordering;

use crate::model::{Value, ValueClass};
use crate::RuntimeError;

/// Comparison operator of a pushed-down scan predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Operator with its operands swapped (`lit < x` becomes `x > lit`).
    pub fn flip(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Ne => CmpOp::Ne,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
        }
    }

    pub fn holds(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    /// Three-valued `left <op> right`.
    ///
    /// Equality across classes is `false`; ordering across classes is a
    /// type error. Any null operand yields `None`.
    pub fn apply(self, left: &Value, right: &Value) -> Result<Option<bool>, RuntimeError> {
        match self {
            CmpOp::Eq => Ok(left.equals(right)),
            CmpOp::Ne => Ok(left.equals(right).map(|b| !b)),
            _ => {
                if !left.is_comparable_with(right) {
                    return Err(RuntimeError::TypeMismatch {
                        context: format!("comparison '{}'", self.symbol()),
                        expected: left.type_name().to_string(),
                        got: right.type_name().to_string(),
                    });
                }
                Ok(left.compare(right).map(|ord| self.holds(ord)))
            }
        }
    }
}

/// Summary statistics for one column chunk.
#[derive(Debug, Clone, Default)]
pub struct ZoneMap {
    min: Option<Value>,
    max: Option<Value>,
    /// At least one slot in the chunk is null or absent.
    pub has_null: bool,
    /// Number of non-null values.
    pub non_null: usize,
    /// Class shared by every non-null value, or `None` if mixed/empty.
    class: Option<ValueClass>,
    mixed: bool,
    /// Some non-null value is NaN.
    unordered: bool,
    ints: bool,
    floats: bool,
    /// Some integer is too large to convert to a float exactly.
    lossy: bool,
}

/// Largest magnitude every integer up to which is exact as an `f64`.
const EXACT_FLOAT_INT: i64 = 1 << 53;

fn is_lossy(value: &Value) -> bool {
    matches!(value, Value::Int(i) if i.unsigned_abs() > EXACT_FLOAT_INT as u64)
}

impl ZoneMap {
    /// Builds a zone map over a chunk of values.
    #[must_use]
    pub fn build(values: &[Value]) -> Self {
        let mut zone = Self::default();
        for v in values {
            zone.include(v);
        }
        zone
    }

    /// Widens the zone map to cover `value`.
    pub fn include(&mut self, value: &Value) {
        if value.is_null() {
            self.has_null = true;
            return;
        }
        self.non_null += 1;
        let class = value.class();
        match self.class {
            None if !self.mixed => self.class = Some(class),
            Some(c) if c != class => {
                self.class = None;
                self.mixed = true;
            }
            _ => {}
        }
        match value {
            Value::Int(_) => {
                self.ints = true;
                self.lossy |= is_lossy(value);
            }
            Value::Float(f) => {
                self.floats = true;
                if f.is_nan() {
                    self.unordered = true;
                    return;
                }
            }
            _ => {}
        }
        if self.mixed || class == ValueClass::List {
            self.min = None;
            self.max = None;
            return;
        }
        if self.min.as_ref().map_or(true, |m| value.compare(m) == Some(Ordering::Less)) {
            self.min = Some(value.clone());
        }
        if self.max.as_ref().map_or(true, |m| value.compare(m) == Some(Ordering::Greater)) {
            self.max = Some(value.clone());
        }
    }

    /// Whether removing `value` may have shrunk the bounds, so the caller
    /// must rebuild the zone map.
    pub fn is_boundary(&self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        let hits = |b: &Option<Value>| b.as_ref().map_or(false, |b| value.equals(b) == Some(true));
        let nan = matches!(value, Value::Float(f) if f.is_nan());
        self.mixed || nan || hits(&self.min) || hits(&self.max)
    }

    pub fn min(&self) -> Option<&Value> { self.min.as_ref() }
    pub fn max(&self) -> Option<&Value> { self.max.as_ref() }

    /// Returns `false` only when no value in the chunk can satisfy
    /// `column <op> literal`.
    #[must_use]
    pub fn might_match(&self, op: CmpOp, literal: &Value) -> bool {
        if self.non_null == 0 {
            // Only nulls: every comparison is unknown.
            return false;
        }
        if literal.is_null() {
            return false;
        }
        if self.unordered && op == CmpOp::Ne {
            return true;
        }
        if self.ints && self.floats && (self.lossy || is_lossy(literal)) {
            return true;
        }
        let (Some(class), Some(min), Some(max)) = (self.class, &self.min, &self.max) else {
            return true;
        };
        if class != literal.class() {
            return true;
        }
        let (Some(lo), Some(hi)) = (literal.compare(min), literal.compare(max)) else {
            return true;
        };
        match op {
            // literal within [min, max]
            CmpOp::Eq => lo != Ordering::Less && hi != Ordering::Greater,
            // all values equal the literal
            CmpOp::Ne => !(lo == Ordering::Equal && hi == Ordering::Equal),
            // some value < literal  <=> min < literal
            CmpOp::Lt => lo == Ordering::Greater,
            CmpOp::Le => lo != Ordering::Less,
            // some value > literal  <=> max > literal
            CmpOp::Gt => hi == Ordering::Less,
            CmpOp::Ge => hi != Ordering::Greater,
        }
    }

    /// Returns `false` when the chunk holds no null/absent slot.
    #[must_use]
    pub fn might_contain_null(&self) -> bool {
        self.has_null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(vals: &[i64]) -> Vec<Value> {
        vals.iter().map(|&v| Value::Int(v)).collect()
    }

    #[test]
    fn test_zone_map_bounds() {
        let zone = ZoneMap::build(&ints(&[20, 35, 18, 40]));
        assert_eq!(zone.min(), Some(&Value::Int(18)));
        assert_eq!(zone.max(), Some(&Value::Int(40)));
        assert!(!zone.has_null);
    }

    #[test]
    fn test_zone_map_range_pruning() {
        let zone = ZoneMap::build(&ints(&[20, 35, 18, 40]));
        assert!(!zone.might_match(CmpOp::Gt, &Value::Int(40)));
        assert!(zone.might_match(CmpOp::Ge, &Value::Int(40)));
        assert!(!zone.might_match(CmpOp::Lt, &Value::Int(18)));
        assert!(zone.might_match(CmpOp::Le, &Value::Int(18)));
        assert!(!zone.might_match(CmpOp::Eq, &Value::Int(50)));
        assert!(zone.might_match(CmpOp::Eq, &Value::Float(35.0)));
    }

    #[test]
    fn test_zone_map_never_prunes_mixed_or_foreign_class() {
        let mixed = ZoneMap::build(&[Value::Int(1), Value::from("x")]);
        assert!(mixed.might_match(CmpOp::Gt, &Value::Int(100)));

        let ints_only = ZoneMap::build(&ints(&[1, 2]));
        assert!(ints_only.might_match(CmpOp::Gt, &Value::from("z")));
    }

    #[test]
    fn test_zone_map_all_null_chunk() {
        let zone = ZoneMap::build(&[Value::Null, Value::Null]);
        assert!(zone.has_null);
        assert!(!zone.might_match(CmpOp::Eq, &Value::Int(1)));
        assert!(zone.might_contain_null());
    }

    #[test]
    fn test_cmp_apply_three_valued() {
        assert_eq!(CmpOp::Gt.apply(&Value::Int(3), &Value::Float(2.5)).unwrap(), Some(true));
        assert_eq!(CmpOp::Eq.apply(&Value::Int(3), &Value::from("3")).unwrap(), Some(false));
        assert_eq!(CmpOp::Lt.apply(&Value::Null, &Value::Int(1)).unwrap(), None);
        assert!(CmpOp::Lt.apply(&Value::Int(1), &Value::from("a")).is_err());
    }

    #[test]
    fn test_nan_keeps_chunk_for_not_equal() {
        let zone = ZoneMap::build(&[Value::Float(5.0), Value::Float(5.0), Value::Float(f64::NAN)]);
        assert_eq!(zone.min(), Some(&Value::Float(5.0)));
        assert_eq!(zone.max(), Some(&Value::Float(5.0)));
        assert!(zone.might_match(CmpOp::Ne, &Value::Float(5.0)));
        // NaN satisfies no ordering, so the bounds still prune those
        assert!(!zone.might_match(CmpOp::Gt, &Value::Float(5.0)));
        assert!(!zone.might_match(CmpOp::Eq, &Value::Int(6)));

        let only_nan = ZoneMap::build(&[Value::Float(f64::NAN)]);
        assert!(only_nan.might_match(CmpOp::Ne, &Value::Float(1.0)));
        assert!(only_nan.is_boundary(&Value::Float(f64::NAN)));
    }

    #[test]
    fn test_large_ints_mixed_with_floats_are_not_pruned() {
        let big = EXACT_FLOAT_INT;
        // 2^53 + 1 and 2^53 both compare equal to the float 2^53
        let zone = ZoneMap::build(&[Value::Float(big as f64), Value::Int(big + 1)]);
        assert!(zone.might_match(CmpOp::Ne, &Value::Int(big)));
        assert!(zone.might_match(CmpOp::Gt, &Value::Int(big)));

        let exact = ZoneMap::build(&[Value::Float(big as f64), Value::Int(big)]);
        assert!(exact.might_match(CmpOp::Lt, &Value::Int(big + 1)));
        assert!(!exact.might_match(CmpOp::Gt, &Value::Int(big)));

        let ints_only = ZoneMap::build(&ints(&[big + 1, big + 1]));
        assert!(!ints_only.might_match(CmpOp::Ne, &Value::Int(big + 1)));
    }

    #[test]
    fn test_zone_map_ne_constant_chunk() {
        let zone = ZoneMap::build(&ints(&[7, 7, 7]));
        assert!(!zone.might_match(CmpOp::Ne, &Value::Int(7)));
        assert!(zone.might_match(CmpOp::Ne, &Value::Int(8)));
    }
}
