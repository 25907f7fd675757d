//! The signal catalog: every named signal, its type and its derivation.
//!
//! Loaded once and immutable afterwards. Loading fails closed: one bad entry
//! rejects the whole document so signals are never silently dropped.

use crate::error::{FlagdeckError, Result};
use crate::expr::{BitRef, Derivation, ANY_EVENT};
use crate::paths;
use crate::types::SignalType;
use crate::value::loosely_equal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

const BUILTIN_CATALOG: &str = include_str!("../assets/catalog.yaml");

const MAX_BIT: u8 = 63;

// ---------------------------------------------------------------------------
// Document types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValue {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Symbolic name for an integer flag word plus names for its bits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagGroup {
    pub path: String,
    #[serde(default)]
    pub bits: BTreeMap<String, u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDef {
    pub id: String,
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<EnumValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub derive: Derivation,
}

#[derive(Debug, Deserialize)]
struct CatalogDoc {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    flag_groups: BTreeMap<String, FlagGroup>,
    #[serde(default)]
    event_categories: BTreeMap<String, Vec<String>>,
    signals: Vec<SignalDef>,
}

fn default_version() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// SignalDef
// ---------------------------------------------------------------------------

/// Outcome of checking a derived value against a signal's declaration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Conformance {
    Accepted(Value),
    Undeclared(Value),
    WrongType(Value),
}

impl SignalDef {
    /// The value emitted whenever derivation cannot produce a valid one.
    pub fn default_value(&self) -> Value {
        if let Some(d) = &self.default {
            return d.clone();
        }
        match self.signal_type {
            SignalType::Enum => self
                .values
                .first()
                .map(|v| v.value.clone())
                .unwrap_or(Value::Null),
            SignalType::Bool => Value::Bool(false),
            SignalType::Number => Value::from(0),
            SignalType::String => Value::String(String::new()),
            SignalType::Array => Value::Array(Vec::new()),
        }
    }

    pub fn declares(&self, value: &Value) -> bool {
        self.values.iter().any(|v| loosely_equal(&v.value, value))
    }

    pub fn label_for(&self, value: &Value) -> Option<&str> {
        self.values
            .iter()
            .find(|v| loosely_equal(&v.value, value))
            .and_then(|v| v.label.as_deref())
    }

    /// Check (and lightly coerce) a derived value against this signal's type.
    /// Boolean signals accept the `0`/`1` a bitfield produces.
    pub(crate) fn conform(&self, value: Value) -> Conformance {
        match self.signal_type {
            SignalType::Enum => match self.values.iter().find(|v| loosely_equal(&v.value, &value)) {
                Some(declared) => Conformance::Accepted(declared.value.clone()),
                None => Conformance::Undeclared(value),
            },
            SignalType::Bool => match &value {
                Value::Bool(_) => Conformance::Accepted(value),
                Value::Number(n) => match n.as_f64() {
                    Some(f) if f == 0.0 => Conformance::Accepted(Value::Bool(false)),
                    Some(f) if f == 1.0 => Conformance::Accepted(Value::Bool(true)),
                    _ => Conformance::WrongType(value),
                },
                _ => Conformance::WrongType(value),
            },
            SignalType::Number if value.is_number() => Conformance::Accepted(value),
            SignalType::String if value.is_string() => Conformance::Accepted(value),
            SignalType::Array if value.is_array() => Conformance::Accepted(value),
            SignalType::Number | SignalType::String | SignalType::Array => {
                Conformance::WrongType(value)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Catalog {
    version: u32,
    flag_groups: BTreeMap<String, FlagGroup>,
    event_categories: BTreeMap<String, Vec<String>>,
    signals: Vec<SignalDef>,
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Parse and validate a catalog document (YAML or JSON).
    pub fn from_yaml(data: &str) -> Result<Self> {
        let doc: CatalogDoc =
            serde_yaml::from_str(data).map_err(|e| FlagdeckError::catalog(e.to_string()))?;
        Self::from_doc(doc)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let catalog = Self::from_yaml(&data)?;
        tracing::info!(
            path = %path.display(),
            signals = catalog.signals.len(),
            "loaded signal catalog"
        );
        Ok(catalog)
    }

    /// The catalog shipped with flagdeck.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_CATALOG)
    }

    pub fn builtin_source() -> &'static str {
        BUILTIN_CATALOG
    }

    fn from_doc(doc: CatalogDoc) -> Result<Self> {
        let mut catalog = Catalog {
            version: doc.version,
            flag_groups: doc.flag_groups,
            event_categories: doc.event_categories,
            signals: Vec::with_capacity(doc.signals.len()),
            index: HashMap::new(),
        };
        catalog.validate_tables()?;

        for signal in doc.signals {
            if catalog.index.contains_key(&signal.id) {
                return Err(FlagdeckError::catalog(format!(
                    "duplicate signal id '{}'",
                    signal.id
                )));
            }
            catalog.validate_signal(&signal)?;
            catalog.index.insert(signal.id.clone(), catalog.signals.len());
            catalog.signals.push(signal);
        }
        Ok(catalog)
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn get(&self, id: &str) -> Option<&SignalDef> {
        self.index.get(id).map(|&i| &self.signals[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Signal IDs in declaration order.
    pub fn all_ids(&self) -> Vec<&str> {
        self.signals.iter().map(|s| s.id.as_str()).collect()
    }

    pub fn signals(&self) -> &[SignalDef] {
        &self.signals
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn flag_group(&self, name: &str) -> Option<&FlagGroup> {
        self.flag_groups.get(name)
    }

    pub fn flag_groups(&self) -> &BTreeMap<String, FlagGroup> {
        &self.flag_groups
    }

    pub fn category(&self, name: &str) -> Option<&[String]> {
        self.event_categories.get(name).map(|v| v.as_slice())
    }

    /// Resolve a bit reference against a flag group into `(path, index)`.
    pub fn resolve_bit(&self, group: &str, bit: &BitRef) -> Option<(&str, u8)> {
        let g = self.flag_groups.get(group)?;
        let index = match bit {
            BitRef::Index(i) => *i,
            BitRef::Name(name) => *g.bits.get(name)?,
        };
        (index <= MAX_BIT).then_some((g.path.as_str(), index))
    }

    /// Every discrete event name referenced anywhere in the catalog,
    /// including the members of categories used by wildcards.
    pub fn known_event_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for signal in &self.signals {
            signal.derive.walk(&mut |expr| match expr {
                Derivation::Recent { event, .. } => {
                    names.insert(event.clone());
                }
                Derivation::JournalEvent {
                    event, category, ..
                } => {
                    if event != ANY_EVENT {
                        names.insert(event.clone());
                    } else if let Some(members) = category.as_deref().and_then(|c| self.category(c)) {
                        names.extend(members.iter().cloned());
                    }
                }
                _ => {}
            });
        }
        names
    }

    /// Names of every combiner the catalog relies on.
    pub fn combiner_names(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        for signal in &self.signals {
            signal.derive.walk(&mut |expr| {
                if let Derivation::Combine { combiner, .. } = expr {
                    names.insert(combiner.as_str());
                }
            });
        }
        names
    }

    /// Largest `within_seconds` used by any `recent` check.
    pub fn max_recent_window(&self) -> Option<f64> {
        let mut max: Option<f64> = None;
        for signal in &self.signals {
            signal.derive.walk(&mut |expr| {
                if let Derivation::Recent { within_seconds, .. } = expr {
                    max = Some(max.map_or(*within_seconds, |m| m.max(*within_seconds)));
                }
            });
        }
        max
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    fn validate_tables(&self) -> Result<()> {
        for (name, group) in &self.flag_groups {
            if group.path.trim().is_empty() {
                return Err(FlagdeckError::catalog(format!(
                    "flag group '{name}' has an empty path"
                )));
            }
            if let Some((bit_name, index)) = group.bits.iter().find(|(_, i)| **i > MAX_BIT) {
                return Err(FlagdeckError::catalog(format!(
                    "flag group '{name}': bit '{bit_name}' index {index} exceeds {MAX_BIT}"
                )));
            }
        }
        for (name, members) in &self.event_categories {
            if members.is_empty() {
                return Err(FlagdeckError::catalog(format!(
                    "event category '{name}' is empty"
                )));
            }
        }
        Ok(())
    }

    fn validate_signal(&self, signal: &SignalDef) -> Result<()> {
        let fail = |reason: String| FlagdeckError::catalog(format!("signal '{}': {reason}", signal.id));

        paths::validate_id(&signal.id)
            .map_err(|_| fail("id must be lowercase alphanumeric with '-' or '_'".to_string()))?;

        match signal.signal_type {
            SignalType::Enum => {
                if signal.values.is_empty() {
                    return Err(fail("enum declares no values".to_string()));
                }
                for (i, v) in signal.values.iter().enumerate() {
                    if signal.values[..i].iter().any(|p| loosely_equal(&p.value, &v.value)) {
                        return Err(fail(format!("duplicate enum value {}", v.value)));
                    }
                }
            }
            _ if !signal.values.is_empty() => {
                return Err(fail(format!(
                    "'values' is only allowed on enum signals, not {}",
                    signal.signal_type
                )));
            }
            _ => {}
        }

        if let Some(default) = &signal.default {
            if !matches!(signal.conform(default.clone()), Conformance::Accepted(_)) {
                return Err(fail(format!(
                    "default {default} is not a valid {} value",
                    signal.signal_type
                )));
            }
        }

        let mut problem: Option<String> = None;
        signal.derive.walk(&mut |expr| {
            if problem.is_none() {
                problem = self.check_expr(expr).err();
            }
        });
        if let Some(reason) = problem {
            return Err(fail(reason));
        }

        // Closed world: every literal the expression can hand back must be a
        // legal value for the signal.
        let (outputs, _) = signal.derive.literal_outputs();
        for out in outputs {
            match signal.conform(out.clone()) {
                Conformance::Accepted(_) => {}
                Conformance::Undeclared(v) => {
                    return Err(fail(format!("derivation can produce undeclared value {v}")));
                }
                Conformance::WrongType(v) => {
                    return Err(fail(format!(
                        "derivation can produce {v}, which is not a {} value",
                        signal.signal_type
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_expr(&self, expr: &Derivation) -> std::result::Result<(), String> {
        match expr {
            Derivation::Path { path, .. } if path.trim().is_empty() => {
                Err("path expression with an empty path".to_string())
            }
            Derivation::Bitfield {
                path,
                field_ref,
                bit,
                ..
            } => match (path, field_ref) {
                (Some(_), Some(_)) => Err("bitfield sets both 'path' and 'field_ref'".to_string()),
                (None, None) => Err("bitfield needs 'path' or 'field_ref'".to_string()),
                (Some(p), None) => match bit {
                    _ if p.trim().is_empty() => Err("bitfield with an empty path".to_string()),
                    BitRef::Index(i) if *i > MAX_BIT => {
                        Err(format!("bit index {i} exceeds {MAX_BIT}"))
                    }
                    BitRef::Index(_) => Ok(()),
                    BitRef::Name(name) => Err(format!(
                        "bit name '{name}' needs a 'field_ref' flag group"
                    )),
                },
                (None, Some(group)) => {
                    if !self.flag_groups.contains_key(group) {
                        return Err(format!("unknown flag group '{group}'"));
                    }
                    match self.resolve_bit(group, bit) {
                        Some(_) => Ok(()),
                        None => Err(format!("flag group '{group}' has no bit {bit:?}")),
                    }
                }
            },
            Derivation::JournalEvent {
                event, category, ..
            } => {
                if event.trim().is_empty() {
                    return Err("journal_event with an empty event".to_string());
                }
                match category {
                    Some(_) if event != ANY_EVENT => Err(format!(
                        "journal_event '{event}': 'category' only applies to the '*' wildcard"
                    )),
                    Some(c) if !self.event_categories.contains_key(c) => {
                        Err(format!("unknown event category '{c}'"))
                    }
                    _ => Ok(()),
                }
            }
            Derivation::FirstMatch { cases, .. } if cases.is_empty() => {
                Err("first_match without cases".to_string())
            }
            Derivation::And { terms } | Derivation::Or { terms } if terms.is_empty() => {
                Err(format!("'{}' without terms", expr.kind()))
            }
            Derivation::Recent {
                event,
                within_seconds,
            } => {
                if event.trim().is_empty() {
                    Err("recent with an empty event".to_string())
                } else if !within_seconds.is_finite() || *within_seconds < 0.0 {
                    Err(format!("recent '{event}': within_seconds must be >= 0"))
                } else {
                    Ok(())
                }
            }
            Derivation::Combine { combiner, .. } if combiner.trim().is_empty() => {
                Err("combine without a combiner name".to_string())
            }
            _ => Ok(()),
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
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
version: 1
flag_groups:
  ship:
    path: dashboard.Flags
    bits: { docked: 0, landed: 1 }
event_categories:
  docking: [Docked, Undocked]
signals:
  - id: docked
    type: bool
    derive: { op: bitfield, field_ref: ship, bit: docked }
  - id: docking_event
    type: string
    derive: { op: journal_event, event: "*", category: docking }
  - id: docking_state
    type: enum
    values:
      - { value: in_space, label: In space }
      - { value: just_docked }
      - { value: docked }
    derive:
      op: first_match
      cases:
        - when:
            op: and
            terms:
              - { op: recent, event: Docked, within_seconds: 3 }
              - { op: bitfield, field_ref: ship, bit: docked }
          value: just_docked
        - when: { op: bitfield, field_ref: ship, bit: docked }
          value: docked
      default: in_space
"#;

    fn with_signals(signals: &str) -> String {
        format!(
            "flag_groups:\n  ship:\n    path: dashboard.Flags\n    bits: {{ docked: 0 }}\nsignals:\n{signals}"
        )
    }

    #[test]
    fn loads_in_declaration_order() {
        let cat = Catalog::from_yaml(MINIMAL).unwrap();
        assert_eq!(cat.all_ids(), vec!["docked", "docking_event", "docking_state"]);
        assert_eq!(cat.get("docking_state").unwrap().signal_type, SignalType::Enum);
        assert!(cat.get("nope").is_none());
    }

    #[test]
    fn known_event_names_include_categories() {
        let cat = Catalog::from_yaml(MINIMAL).unwrap();
        let names: Vec<_> = cat.known_event_names().into_iter().collect();
        assert_eq!(names, vec!["Docked".to_string(), "Undocked".to_string()]);
    }

    #[test]
    fn enum_defaults_to_first_value() {
        let cat = Catalog::from_yaml(MINIMAL).unwrap();
        let s = cat.get("docking_state").unwrap();
        assert_eq!(s.default_value(), json!("in_space"));
        assert_eq!(s.label_for(&json!("in_space")), Some("In space"));
        assert_eq!(cat.get("docked").unwrap().default_value(), json!(false));
    }

    #[test]
    fn missing_type_rejects_whole_catalog() {
        let yaml = with_signals(
            "  - id: ok\n    type: bool\n    derive: { op: literal, value: true }\n  - id: broken\n    derive: { op: literal, value: 1 }\n",
        );
        let err = Catalog::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, FlagdeckError::MalformedSchema { .. }));
        assert!(err.to_string().contains("type"));
    }

    #[test]
    fn enum_without_values_rejected() {
        let yaml = with_signals("  - id: e\n    type: enum\n    derive: { op: literal, value: x }\n");
        let err = Catalog::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("no values"));
    }

    #[test]
    fn unknown_op_rejected() {
        let yaml = with_signals("  - id: e\n    type: number\n    derive: { op: multi_source, inputs: [] }\n");
        assert!(Catalog::from_yaml(&yaml).is_err());
    }

    #[test]
    fn undeclared_map_value_rejected_statically() {
        let yaml = with_signals(
            r#"  - id: focus
    type: enum
    values: [ { value: none }, { value: galaxy_map } ]
    derive:
      op: map
      from: { op: path, path: dashboard.GuiFocus }
      map: { "0": none, "6": galaxy_map, "7": system_map }
      default: none
"#,
        );
        let err = Catalog::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("undeclared value \"system_map\""));
    }

    #[test]
    fn undeclared_default_rejected() {
        let yaml = with_signals(
            "  - id: e\n    type: enum\n    values: [ { value: a } ]\n    default: b\n    derive: { op: literal, value: a }\n",
        );
        let err = Catalog::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("default"));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let yaml = with_signals(
            "  - id: a\n    type: bool\n    derive: { op: literal, value: true }\n  - id: a\n    type: bool\n    derive: { op: literal, value: false }\n",
        );
        let err = Catalog::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate signal id 'a'"));
    }

    #[test]
    fn bitfield_sources_are_exclusive() {
        let both = with_signals(
            "  - id: a\n    type: bool\n    derive: { op: bitfield, path: dashboard.Flags, field_ref: ship, bit: 0 }\n",
        );
        assert!(Catalog::from_yaml(&both).unwrap_err().to_string().contains("both"));

        let unknown = with_signals(
            "  - id: a\n    type: bool\n    derive: { op: bitfield, field_ref: ship, bit: landed }\n",
        );
        assert!(Catalog::from_yaml(&unknown).unwrap_err().to_string().contains("no bit"));

        let named_without_group = with_signals(
            "  - id: a\n    type: bool\n    derive: { op: bitfield, path: dashboard.Flags, bit: docked }\n",
        );
        assert!(Catalog::from_yaml(&named_without_group).is_err());
    }

    #[test]
    fn wrong_literal_type_rejected() {
        let yaml = with_signals("  - id: n\n    type: number\n    derive: { op: literal, value: fast }\n");
        let err = Catalog::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("not a number value"));
    }

    #[test]
    fn category_requires_wildcard() {
        let yaml = r#"
event_categories:
  docking: [Docked]
signals:
  - id: e
    type: string
    derive: { op: journal_event, event: Docked, category: docking }
"#;
        assert!(Catalog::from_yaml(yaml).is_err());
    }

    #[test]
    fn max_recent_window_and_combiners() {
        let yaml = r#"
signals:
  - id: a
    type: bool
    derive:
      op: or
      terms:
        - { op: recent, event: Docked, within_seconds: 3 }
        - { op: recent, event: Undocked, within_seconds: 7.5 }
  - id: b
    type: number
    derive: { op: combine, combiner: sum, inputs: [ { op: path, path: x } ] }
"#;
        let cat = Catalog::from_yaml(yaml).unwrap();
        assert_eq!(cat.max_recent_window(), Some(7.5));
        assert_eq!(cat.combiner_names().into_iter().collect::<Vec<_>>(), vec!["sum"]);
    }

    #[test]
    fn load_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(&path, MINIMAL).unwrap();
        let cat = Catalog::load(&path).unwrap();
        assert_eq!(cat.len(), 3);
    }

    #[test]
    fn builtin_catalog_is_valid() {
        let cat = Catalog::builtin().unwrap();
        assert!(cat.contains("docking_state"));
        assert!(cat.contains("hardpoints"));
        assert!(cat.known_event_names().contains("Docked"));
    }
}
