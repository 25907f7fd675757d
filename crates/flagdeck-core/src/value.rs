//! Value semantics shared by derivation expressions and rule conditions.
//!
//! Frames and snapshots carry plain `serde_json::Value`s; everything that
//! needs to interpret one (truthiness, map keys, comparisons, flag words)
//! goes through this module so both engines agree.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Truthiness used by `when`, `and`, `or` and `not`.
///
/// `None` (absent) and `null` are false.
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

/// Render a value as a map-table key. Strings are used verbatim, integral
/// numbers drop any fractional part, composites have no key.
pub fn map_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().map(|f| {
                    if f.fract() == 0.0 && f.abs() < 1e15 {
                        format!("{}", f as i64)
                    } else {
                        f.to_string()
                    }
                })
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Equality with numeric normalisation (`1 == 1.0`).
pub fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Interpret a value as an unsigned flag word.
pub fn flag_word(value: &Value) -> Option<u64> {
    let Value::Number(n) = value else {
        return None;
    };
    if let Some(u) = n.as_u64() {
        return Some(u);
    }
    // Negative words are reinterpreted bitwise; some producers emit i32 flags.
    if let Some(i) = n.as_i64() {
        return Some(i as u64);
    }
    let f = n.as_f64()?;
    (f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64).then_some(f as u64)
}

/// Extract a single bit from a flag word as `0` / `1`.
pub fn bit(word: u64, index: u8) -> u64 {
    (word >> index) & 1
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    pub fn as_str(self) -> &'static str {
        match self {
            Comparison::Eq => "eq",
            Comparison::Ne => "ne",
            Comparison::Gt => "gt",
            Comparison::Gte => "gte",
            Comparison::Lt => "lt",
            Comparison::Lte => "lte",
        }
    }

    /// Apply the comparison. `None` means the operands cannot be compared
    /// this way (an ordering test on non-numbers).
    pub fn apply(self, lhs: &Value, rhs: &Value) -> Option<bool> {
        match self {
            Comparison::Eq => Some(loosely_equal(lhs, rhs)),
            Comparison::Ne => Some(!loosely_equal(lhs, rhs)),
            Comparison::Gt => Some(order(lhs, rhs)? == Ordering::Greater),
            Comparison::Gte => Some(order(lhs, rhs)? != Ordering::Less),
            Comparison::Lt => Some(order(lhs, rhs)? == Ordering::Less),
            Comparison::Lte => Some(order(lhs, rhs)? != Ordering::Greater),
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn order(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    let l = lhs.as_f64()?;
    let r = rhs.as_f64()?;
    l.partial_cmp(&r)
}

/// Membership using the same equality as [`Comparison::Eq`].
pub fn contains(set: &[Value], value: &Value) -> bool {
    set.iter().any(|candidate| loosely_equal(candidate, value))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness() {
        assert!(!truthy(None));
        assert!(!truthy(Some(&Value::Null)));
        assert!(truthy(Some(&json!(1))));
        assert!(!truthy(Some(&json!(0))));
        assert!(!truthy(Some(&json!(""))));
        assert!(truthy(Some(&json!("docked"))));
        assert!(!truthy(Some(&json!([]))));
        assert!(truthy(Some(&json!(true))));
    }

    #[test]
    fn map_keys_normalise_numbers() {
        assert_eq!(map_key(&json!(6)).as_deref(), Some("6"));
        assert_eq!(map_key(&json!(6.0)).as_deref(), Some("6"));
        assert_eq!(map_key(&json!(0.5)).as_deref(), Some("0.5"));
        assert_eq!(map_key(&json!("Clean")).as_deref(), Some("Clean"));
        assert_eq!(map_key(&json!(true)).as_deref(), Some("true"));
        assert!(map_key(&json!({"a": 1})).is_none());
    }

    #[test]
    fn ordered_comparisons_need_numbers() {
        assert_eq!(Comparison::Gt.apply(&json!(5), &json!(3)), Some(true));
        assert_eq!(Comparison::Lte.apply(&json!(3.0), &json!(3)), Some(true));
        assert_eq!(Comparison::Lt.apply(&json!("a"), &json!(3)), None);
        assert_eq!(Comparison::Eq.apply(&json!(1), &json!(1.0)), Some(true));
        assert_eq!(Comparison::Ne.apply(&json!("x"), &json!("y")), Some(true));
    }

    #[test]
    fn ordered_comparisons_at_the_boundary() {
        let cases = [
            (Comparison::Gt, false, true),
            (Comparison::Gte, true, true),
            (Comparison::Lt, false, false),
            (Comparison::Lte, true, false),
        ];
        for (cmp, at_equal, above) in cases {
            assert_eq!(cmp.apply(&json!(4), &json!(4)), Some(at_equal), "{cmp} at 4");
            assert_eq!(cmp.apply(&json!(4.5), &json!(4)), Some(above), "{cmp} above 4");
            assert_eq!(cmp.apply(&Value::Null, &json!(4)), None, "{cmp} on null");
        }
    }

    #[test]
    fn flag_words() {
        assert_eq!(flag_word(&json!(16777229)), Some(16777229));
        assert_eq!(flag_word(&json!(-1)), Some(u64::MAX));
        assert_eq!(flag_word(&json!(4.0)), Some(4));
        assert_eq!(flag_word(&json!("4")), None);
        assert_eq!(bit(0b101, 0), 1);
        assert_eq!(bit(0b101, 1), 0);
    }
}
