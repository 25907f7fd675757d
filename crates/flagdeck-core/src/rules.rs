//! Rule documents: user-authored conditions over signals and raw fields,
//! with the actions to fire when a rule becomes true or false.
//!
//! Loading validates the whole document against the catalog and produces a
//! `RuleSet` stamped with a fresh generation, so match memory built against
//! an older set can be recognised and discarded.

use crate::catalog::Catalog;
use crate::error::{FlagdeckError, Result};
use crate::paths;
use crate::types::{RuleId, SignalType, Source};
use crate::value::{contains, Comparison};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

const STARTER_RULES: &str = include_str!("../assets/rules.yaml");

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// An opaque named effect. Interpreting it is the caller's business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    SetFlag {
        token: String,
    },
    ClearFlag {
        token: String,
    },
    Log {
        message: String,
    },
    Emit {
        name: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        payload: Value,
    },
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// What a condition leaf reads.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A derived signal from the snapshot.
    Signal(String),
    /// A raw frame field by dotted path.
    Field(String),
    /// A flag word, via a catalog flag group.
    Flags { group: String, path: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Test {
    Compare(Comparison, Value),
    In(Vec<Value>),
    /// Bit indices that must all be set, of which one must be set, and
    /// which must all be clear. Empty lists are vacuous.
    Bits {
        all_of: Vec<u8>,
        any_of: Vec<u8>,
        none_of: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub operand: Operand,
    pub test: Test,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Leaf(Leaf),
}

/// Cheap pre-check on where a frame came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub source: Option<Source>,
    pub events: Vec<String>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.events.is_empty()
    }

    pub fn accepts(&self, source: Source, event: Option<&str>) -> bool {
        if self.source.is_some_and(|s| s != source) {
            return false;
        }
        self.events.is_empty() || event.is_some_and(|e| self.events.iter().any(|f| f == e))
    }
}

// ---------------------------------------------------------------------------
// Rule / RuleSet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: RuleId,
    pub title: String,
    pub filter: Filter,
    pub all: Option<Vec<Condition>>,
    pub any: Option<Vec<Condition>>,
    pub then: Vec<Action>,
    pub otherwise: Vec<Action>,
}

#[derive(Debug, Clone)]
pub struct RuleSet {
    generation: u64,
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Parse and validate a rule document against `catalog`.
    pub fn from_yaml(data: &str, catalog: &Catalog) -> Result<Self> {
        let doc: RulesDoc =
            serde_yaml::from_str(data).map_err(|e| FlagdeckError::rules(e.to_string()))?;

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(doc.rules.len());
        for (i, raw) in doc.rules.into_iter().enumerate() {
            let rule = compile_rule(raw, catalog)
                .map_err(|reason| FlagdeckError::rules(format!("rule #{}: {reason}", i + 1)))?;
            if !seen.insert(rule.id.clone()) {
                return Err(FlagdeckError::rules(format!(
                    "duplicate rule id '{}'",
                    rule.id
                )));
            }
            rules.push(rule);
        }

        Ok(Self {
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            rules,
        })
    }

    pub fn load(path: &Path, catalog: &Catalog) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let set = Self::from_yaml(&data, catalog)?;
        tracing::info!(
            path = %path.display(),
            rules = set.rules.len(),
            generation = set.generation,
            "loaded rule set"
        );
        Ok(set)
    }

    pub fn starter_source() -> &'static str {
        STARTER_RULES
    }

    /// Unique per load; a reload always yields a new generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, id: &RuleId) -> Option<&Rule> {
        self.rules.iter().find(|r| &r.id == id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Document types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RulesDoc {
    #[serde(default)]
    rules: Vec<RuleDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleDoc {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: String,
    when: WhenDoc,
    #[serde(default)]
    then: Vec<Action>,
    #[serde(default, rename = "else")]
    otherwise: Vec<Action>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WhenDoc {
    #[serde(default)]
    source: Option<Source>,
    #[serde(default)]
    event: Option<OneOrMany>,
    #[serde(default)]
    all: Option<Vec<ConditionDoc>>,
    #[serde(default)]
    any: Option<Vec<ConditionDoc>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConditionDoc {
    #[serde(default)]
    signal: Option<String>,
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    flags: Option<String>,

    #[serde(default)]
    eq: Option<Value>,
    #[serde(default)]
    ne: Option<Value>,
    #[serde(default, rename = "in")]
    one_of: Option<Vec<Value>>,
    #[serde(default)]
    gt: Option<Value>,
    #[serde(default)]
    gte: Option<Value>,
    #[serde(default)]
    lt: Option<Value>,
    #[serde(default)]
    lte: Option<Value>,

    #[serde(default)]
    all_of: Option<Vec<String>>,
    #[serde(default)]
    any_of: Option<Vec<String>>,
    #[serde(default)]
    none_of: Option<Vec<String>>,

    #[serde(default)]
    all: Option<Vec<ConditionDoc>>,
    #[serde(default)]
    any: Option<Vec<ConditionDoc>>,
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

type Compiled<T> = std::result::Result<T, String>;

fn compile_rule(raw: RuleDoc, catalog: &Catalog) -> Compiled<Rule> {
    let title = raw.title.trim().to_string();
    if title.is_empty() {
        return Err("missing title".to_string());
    }
    let id = match raw.id {
        Some(id) => id,
        None => paths::slugify(&title),
    };
    paths::validate_id(&id).map_err(|e| format!("'{title}': {e}"))?;
    let fail = |reason: String| format!("'{id}': {reason}");

    let events = raw.when.event.map(OneOrMany::into_vec).unwrap_or_default();
    if events.iter().any(|e| e.trim().is_empty()) {
        return Err(fail("empty event name in filter".to_string()));
    }

    if raw.when.all.is_none() && raw.when.any.is_none() {
        return Err(fail("'when' needs 'all' or 'any'".to_string()));
    }
    let all = raw
        .when
        .all
        .map(|c| compile_group(c, "all", catalog))
        .transpose()
        .map_err(fail)?;
    let any = raw
        .when
        .any
        .map(|c| compile_group(c, "any", catalog))
        .transpose()
        .map_err(fail)?;

    if raw.then.is_empty() {
        return Err(fail("'then' has no actions".to_string()));
    }
    for action in raw.then.iter().chain(raw.otherwise.iter()) {
        check_action(action).map_err(fail)?;
    }

    Ok(Rule {
        id: RuleId::new(id.clone()),
        title,
        filter: Filter {
            source: raw.when.source,
            events,
        },
        all,
        any,
        then: raw.then,
        otherwise: raw.otherwise,
    })
}

fn compile_group(docs: Vec<ConditionDoc>, name: &str, catalog: &Catalog) -> Compiled<Vec<Condition>> {
    if docs.is_empty() {
        return Err(format!("'{name}' is empty"));
    }
    docs.into_iter().map(|d| compile_condition(d, catalog)).collect()
}

fn compile_condition(doc: ConditionDoc, catalog: &Catalog) -> Compiled<Condition> {
    let has_leaf_parts = doc.signal.is_some() || doc.field.is_some() || doc.flags.is_some();

    match (doc.all, doc.any) {
        (Some(_), Some(_)) => return Err("a nested group takes 'all' or 'any', not both".to_string()),
        (Some(inner), None) if !has_leaf_parts => {
            return compile_group(inner, "all", catalog).map(Condition::All)
        }
        (None, Some(inner)) if !has_leaf_parts => {
            return compile_group(inner, "any", catalog).map(Condition::Any)
        }
        (Some(_), None) | (None, Some(_)) => {
            return Err("a condition is either a nested group or a leaf".to_string())
        }
        (None, None) => {}
    }

    let operand = match (doc.signal, doc.field, doc.flags) {
        (Some(s), None, None) => {
            if !catalog.contains(&s) {
                return Err(format!("unknown signal '{s}'"));
            }
            Operand::Signal(s)
        }
        (None, Some(f), None) if !f.trim().is_empty() => Operand::Field(f),
        (None, Some(_), None) => return Err("empty field path".to_string()),
        (None, None, Some(group)) => {
            let g = catalog
                .flag_group(&group)
                .ok_or_else(|| format!("unknown flag group '{group}'"))?;
            Operand::Flags {
                path: g.path.clone(),
                group,
            }
        }
        (None, None, None) => return Err("condition needs 'signal', 'field' or 'flags'".to_string()),
        _ => return Err("condition takes exactly one of 'signal', 'field', 'flags'".to_string()),
    };

    let mut compares: Vec<Test> = [
        (Comparison::Eq, doc.eq),
        (Comparison::Ne, doc.ne),
        (Comparison::Gt, doc.gt),
        (Comparison::Gte, doc.gte),
        (Comparison::Lt, doc.lt),
        (Comparison::Lte, doc.lte),
    ]
    .into_iter()
    .filter_map(|(cmp, v)| v.map(|v| Test::Compare(cmp, v)))
    .collect();
    if let Some(set) = doc.one_of {
        compares.push(Test::In(set));
    }
    let bit_tests = [&doc.all_of, &doc.any_of, &doc.none_of]
        .iter()
        .any(|t| t.is_some());

    let test = match &operand {
        Operand::Flags { group, .. } => {
            if !compares.is_empty() {
                return Err(format!("flags '{group}' only supports all_of / any_of / none_of"));
            }
            if !bit_tests {
                return Err(format!("flags '{group}' needs all_of, any_of or none_of"));
            }
            let resolve = |names: Option<Vec<String>>| -> Compiled<Vec<u8>> {
                let names = names.unwrap_or_default();
                names
                    .iter()
                    .map(|n| {
                        catalog
                            .flag_group(group)
                            .and_then(|g| g.bits.get(n).copied())
                            .ok_or_else(|| format!("flag group '{group}' has no bit '{n}'"))
                    })
                    .collect()
            };
            let (all_of, any_of, none_of) = (
                resolve(doc.all_of)?,
                resolve(doc.any_of)?,
                resolve(doc.none_of)?,
            );
            if all_of.is_empty() && any_of.is_empty() && none_of.is_empty() {
                return Err(format!("flags '{group}' lists no bits"));
            }
            Test::Bits {
                all_of,
                any_of,
                none_of,
            }
        }
        Operand::Signal(_) | Operand::Field(_) => {
            if bit_tests {
                return Err("all_of / any_of / none_of need a 'flags' operand".to_string());
            }
            if compares.len() != 1 {
                return Err("condition needs exactly one of eq, ne, in, gt, gte, lt, lte".to_string());
            }
            compares.remove(0)
        }
    };

    check_test(&operand, &test, catalog)?;
    Ok(Condition::Leaf(Leaf { operand, test }))
}

fn check_test(operand: &Operand, test: &Test, catalog: &Catalog) -> Compiled<()> {
    match test {
        Test::Compare(cmp, v)
            if matches!(cmp, Comparison::Gt | Comparison::Gte | Comparison::Lt | Comparison::Lte)
                && !v.is_number() =>
        {
            return Err(format!("'{cmp}' needs a number, got {v}"));
        }
        Test::In(set) if set.is_empty() => return Err("'in' with an empty list".to_string()),
        _ => {}
    }

    // Comparing an enum signal to a value it can never take is a typo.
    if let Operand::Signal(id) = operand {
        let Some(signal) = catalog.get(id) else {
            return Ok(());
        };
        if signal.signal_type != SignalType::Enum {
            return Ok(());
        }
        let literals: Vec<&Value> = match test {
            Test::Compare(Comparison::Eq | Comparison::Ne, v) => vec![v],
            Test::In(set) => set.iter().collect(),
            _ => Vec::new(),
        };
        let declared: Vec<Value> = signal.values.iter().map(|v| v.value.clone()).collect();
        if let Some(bad) = literals.into_iter().find(|v| !contains(&declared, v)) {
            return Err(format!("signal '{id}' never takes the value {bad}"));
        }
    }
    Ok(())
}

fn check_action(action: &Action) -> Compiled<()> {
    match action {
        Action::SetFlag { token } | Action::ClearFlag { token } if token.trim().is_empty() => {
            Err("flag action with an empty token".to_string())
        }
        Action::Emit { name, .. } if name.trim().is_empty() => {
            Err("emit action with an empty name".to_string())
        }
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
