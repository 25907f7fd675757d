//! Derivation expressions: the closed set of operations a catalog signal
//! can be computed with.

use crate::value::Comparison;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Wildcard accepted by `journal_event` in place of a literal event name.
pub const ANY_EVENT: &str = "*";

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Derivation {
    /// Dotted lookup into the frame's namespaces.
    Path {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
    /// One bit (as 0/1) of an integer word. Exactly one of `path` and
    /// `field_ref` is set; `field_ref` names a catalog flag group.
    Bitfield {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field_ref: Option<String>,
        bit: BitRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
    /// Look the stringified result of `from` up in a table.
    Map {
        from: Box<Derivation>,
        map: BTreeMap<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
    /// A field of the current frame, only when it carries a matching event.
    JournalEvent {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
    /// Ordered cases; the first truthy `when` wins.
    FirstMatch {
        cases: Vec<Case>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
    And {
        terms: Vec<Derivation>,
    },
    Or {
        terms: Vec<Derivation>,
    },
    Not {
        term: Box<Derivation>,
    },
    /// True iff `event` occurred no more than `within_seconds` ago.
    Recent {
        event: String,
        within_seconds: f64,
    },
    Compare {
        from: Box<Derivation>,
        cmp: Comparison,
        value: Value,
    },
    Literal {
        value: Value,
    },
    /// Named extension point: inputs are evaluated and handed to a combiner
    /// registered with the engine under `combiner`.
    Combine {
        combiner: String,
        inputs: Vec<Derivation>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub when: Derivation,
    pub value: Value,
}

/// A bit position, or a bit name resolved through a flag group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BitRef {
    Index(u8),
    Name(String),
}

impl Derivation {
    pub fn kind(&self) -> &'static str {
        match self {
            Derivation::Path { .. } => "path",
            Derivation::Bitfield { .. } => "bitfield",
            Derivation::Map { .. } => "map",
            Derivation::JournalEvent { .. } => "journal_event",
            Derivation::FirstMatch { .. } => "first_match",
            Derivation::And { .. } => "and",
            Derivation::Or { .. } => "or",
            Derivation::Not { .. } => "not",
            Derivation::Recent { .. } => "recent",
            Derivation::Compare { .. } => "compare",
            Derivation::Literal { .. } => "literal",
            Derivation::Combine { .. } => "combine",
        }
    }

    /// Visit this expression and every nested one, parents first.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Derivation)) {
        f(self);
        match self {
            Derivation::Map { from, .. }
            | Derivation::Compare { from, .. } => from.walk(f),
            Derivation::Not { term } => term.walk(f),
            Derivation::FirstMatch { cases, .. } => {
                for case in cases {
                    case.when.walk(f);
                }
            }
            Derivation::And { terms } | Derivation::Or { terms } => {
                for term in terms {
                    term.walk(f);
                }
            }
            Derivation::Combine { inputs, .. } => {
                for input in inputs {
                    input.walk(f);
                }
            }
            Derivation::Path { .. }
            | Derivation::Bitfield { .. }
            | Derivation::JournalEvent { .. }
            | Derivation::Recent { .. }
            | Derivation::Literal { .. } => {}
        }
    }

    /// Every literal this expression can hand back as its result.
    ///
    /// The flag is `false` when the result can also be a value read from the
    /// frame (or produced by a combiner), which only a runtime check can
    /// police.
    pub fn literal_outputs(&self) -> (Vec<Value>, bool) {
        fn with_default(mut out: Vec<Value>, default: &Option<Value>) -> Vec<Value> {
            if let Some(d) = default {
                out.push(d.clone());
            }
            out
        }

        match self {
            Derivation::Literal { value } => (vec![value.clone()], true),
            Derivation::Map { map, default, .. } => {
                (with_default(map.values().cloned().collect(), default), true)
            }
            Derivation::FirstMatch { cases, default } => (
                with_default(cases.iter().map(|c| c.value.clone()).collect(), default),
                true,
            ),
            Derivation::Bitfield { default, .. } => {
                (with_default(vec![Value::from(0), Value::from(1)], default), true)
            }
            Derivation::And { .. }
            | Derivation::Or { .. }
            | Derivation::Not { .. }
            | Derivation::Recent { .. }
            | Derivation::Compare { .. } => (vec![Value::Bool(true), Value::Bool(false)], true),
            Derivation::Path { default, .. } | Derivation::JournalEvent { default, .. } => {
                (with_default(Vec::new(), default), false)
            }
            Derivation::Combine { .. } => (Vec::new(), false),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_nested_first_match() {
        let yaml = r#"
op: first_match
cases:
  - when:
      op: and
      terms:
        - { op: recent, event: Docked, within_seconds: 3 }
        - { op: bitfield, field_ref: ship, bit: docked }
    value: just_docked
  - when: { op: bitfield, path: dashboard.Flags, bit: 0 }
    value: docked
default: in_space
"#;
        let expr: Derivation = serde_yaml::from_str(yaml).unwrap();
        let Derivation::FirstMatch { cases, default } = &expr else {
            panic!("expected first_match, got {}", expr.kind());
        };
        assert_eq!(cases.len(), 2);
        assert_eq!(default, &Some(json!("in_space")));
        assert!(matches!(
            &cases[1].when,
            Derivation::Bitfield { bit: BitRef::Index(0), .. }
        ));
    }

    #[test]
    fn unknown_op_is_rejected() {
        let yaml = "op: multi_source\ninputs: []\n";
        assert!(serde_yaml::from_str::<Derivation>(yaml).is_err());
    }

    #[test]
    fn walk_visits_every_node() {
        let yaml = r#"
op: map
from:
  op: compare
  from: { op: path, path: dashboard.GuiFocus }
  cmp: gt
  value: 0
map: { "true": focused, "false": idle }
"#;
        let expr: Derivation = serde_yaml::from_str(yaml).unwrap();
        let mut kinds = Vec::new();
        expr.walk(&mut |e| kinds.push(e.kind()));
        assert_eq!(kinds, vec!["map", "compare", "path"]);
    }

    #[test]
    fn literal_outputs_of_map_include_default() {
        let yaml = r#"
op: map
from: { op: path, path: dashboard.GuiFocus }
map: { "0": none, "6": galaxy_map }
default: other
"#;
        let expr: Derivation = serde_yaml::from_str(yaml).unwrap();
        let (outputs, closed) = expr.literal_outputs();
        assert!(closed);
        assert_eq!(outputs.len(), 3);
        assert!(outputs.contains(&json!("other")));
    }

    #[test]
    fn path_outputs_are_open() {
        let expr = Derivation::Path {
            path: "dashboard.LegalState".to_string(),
            default: Some(json!("Clean")),
        };
        let (outputs, closed) = expr.literal_outputs();
        assert!(!closed);
        assert_eq!(outputs, vec![json!("Clean")]);
    }
}
