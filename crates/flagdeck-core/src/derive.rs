//! Signal derivation: one frame plus recency context in, full snapshot out.
//!
//! Derivation never fails. Telemetry frames are partial by nature, so a
//! signal whose expression yields nothing (or something illegal) falls back
//! to its declared default and the rest of the frame carries on.

use crate::catalog::{Catalog, Conformance, SignalDef};
use crate::error::{FlagdeckError, Result};
use crate::expr::{BitRef, Derivation, ANY_EVENT};
use crate::frame::{lookup, Externals, Frame};
use crate::recency::RecencyIndex;
use crate::types::SignalType;
use crate::value::{bit, flag_word, map_key, truthy};
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Combiners
// ---------------------------------------------------------------------------

/// Combination function behind a `combine` expression. Receives the inputs
/// in declared order; absent inputs are `None`.
pub trait Combiner: Send + Sync {
    fn combine(&self, inputs: &[Option<Value>]) -> Option<Value>;
}

impl<F> Combiner for F
where
    F: Fn(&[Option<Value>]) -> Option<Value> + Send + Sync,
{
    fn combine(&self, inputs: &[Option<Value>]) -> Option<Value> {
        self(inputs)
    }
}

#[derive(Clone, Default)]
pub struct Combiners {
    by_name: HashMap<String, Arc<dyn Combiner>>,
}

impl Combiners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, combiner: impl Combiner + 'static) -> Self {
        self.by_name.insert(name.into(), Arc::new(combiner));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Combiner>> {
        self.by_name.get(name)
    }
}

impl fmt::Debug for Combiners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.by_name.keys().collect();
        names.sort();
        f.debug_struct("Combiners").field("names", &names).finish()
    }
}

// ---------------------------------------------------------------------------
// DeriveContext
// ---------------------------------------------------------------------------

/// Everything besides the frame that a derivation may read.
#[derive(Debug, Clone, Copy)]
pub struct DeriveContext<'a> {
    pub recency: &'a RecencyIndex,
    pub externals: &'a Externals,
    /// Reference time for `recent` checks.
    pub now: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    id: String,
    value: Value,
    fallback: bool,
}

/// Every catalog signal's value for one frame, in catalog order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl Snapshot {
    fn push(&mut self, id: &str, value: Value, fallback: bool) {
        self.index.insert(id.to_string(), self.entries.len());
        self.entries.push(Entry {
            id: id.to_string(),
            value,
            fallback,
        });
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.index.get(id).map(|&i| &self.entries[i].value)
    }

    /// The value only if it was actually derived from this frame rather than
    /// substituted by the signal's default.
    pub fn derived(&self, id: &str) -> Option<&Value> {
        self.index
            .get(id)
            .map(|&i| &self.entries[i])
            .filter(|e| !e.fallback)
            .map(|e| &e.value)
    }

    pub fn is_fallback(&self, id: &str) -> bool {
        self.index
            .get(id)
            .is_some_and(|&i| self.entries[i].fallback)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|e| (e.id.as_str(), &e.value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for e in &self.entries {
            map.serialize_entry(&e.id, &e.value)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// A recovered problem with one signal on one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    UndeclaredEnumValue { signal: String, value: Value },
    WrongType {
        signal: String,
        expected: SignalType,
        value: Value,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UndeclaredEnumValue { signal, value } => {
                write!(f, "signal '{signal}' derived undeclared value {value}")
            }
            Diagnostic::WrongType {
                signal,
                expected,
                value,
            } => write!(f, "signal '{signal}' derived {value}, expected {expected}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Derived {
    pub snapshot: Snapshot,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

// ---------------------------------------------------------------------------
// Deriver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Deriver {
    catalog: Arc<Catalog>,
    combiners: Combiners,
}

impl Deriver {
    pub fn new(catalog: Arc<Catalog>) -> Result<Self> {
        Self::with_combiners(catalog, Combiners::new())
    }

    /// Fails if any `combine` expression names a combiner not supplied here.
    pub fn with_combiners(catalog: Arc<Catalog>, combiners: Combiners) -> Result<Self> {
        for signal in catalog.signals() {
            let mut missing: Option<String> = None;
            signal.derive.walk(&mut |expr| {
                if let Derivation::Combine { combiner, .. } = expr {
                    if missing.is_none() && combiners.get(combiner).is_none() {
                        missing = Some(combiner.clone());
                    }
                }
            });
            if let Some(combiner) = missing {
                return Err(FlagdeckError::UnknownCombiner {
                    signal: signal.id.clone(),
                    combiner,
                });
            }
        }
        Ok(Self { catalog, combiners })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn derive_all(&self, frame: &Frame, ctx: &DeriveContext<'_>) -> Snapshot {
        self.derive(frame, ctx).snapshot
    }

    /// Derive every signal and report what had to be recovered.
    pub fn derive(&self, frame: &Frame, ctx: &DeriveContext<'_>) -> Derived {
        let mut snapshot = Snapshot::default();
        let mut diagnostics = Vec::new();

        for signal in self.catalog.signals() {
            let (value, fallback) = match self.derive_signal(signal, frame, ctx) {
                Ok(value) => (value, false),
                Err(Some(diag)) => {
                    tracing::warn!(%diag, "substituting declared default");
                    diagnostics.push(diag);
                    (signal.default_value(), true)
                }
                Err(None) => {
                    tracing::trace!(signal = %signal.id, "no data on this frame; using default");
                    (signal.default_value(), true)
                }
            };
            snapshot.push(&signal.id, value, fallback);
        }

        Derived {
            snapshot,
            diagnostics,
        }
    }

    /// Derive a single signal. `None` if the ID is unknown.
    pub fn derive_one(&self, id: &str, frame: &Frame, ctx: &DeriveContext<'_>) -> Option<Value> {
        let signal = self.catalog.get(id)?;
        Some(
            self.derive_signal(signal, frame, ctx)
                .unwrap_or_else(|_| signal.default_value()),
        )
    }

    fn derive_signal(
        &self,
        signal: &SignalDef,
        frame: &Frame,
        ctx: &DeriveContext<'_>,
    ) -> std::result::Result<Value, Option<Diagnostic>> {
        let raw = self.eval(&signal.derive, frame, ctx).ok_or(None)?;
        match signal.conform(raw) {
            Conformance::Accepted(value) => Ok(value),
            Conformance::Undeclared(value) => Err(Some(Diagnostic::UndeclaredEnumValue {
                signal: signal.id.clone(),
                value,
            })),
            Conformance::WrongType(value) => Err(Some(Diagnostic::WrongType {
                signal: signal.id.clone(),
                expected: signal.signal_type,
                value,
            })),
        }
    }

    fn eval(&self, expr: &Derivation, frame: &Frame, ctx: &DeriveContext<'_>) -> Option<Value> {
        match expr {
            Derivation::Path { path, default } => lookup(frame, ctx.externals, path)
                .cloned()
                .or_else(|| default.clone()),

            Derivation::Bitfield {
                path,
                field_ref,
                bit: bit_ref,
                default,
            } => {
                let target = match (path, field_ref) {
                    (_, Some(group)) => self.catalog.resolve_bit(group, bit_ref),
                    (Some(p), None) => match bit_ref {
                        BitRef::Index(i) => Some((p.as_str(), *i)),
                        BitRef::Name(_) => None,
                    },
                    (None, None) => None,
                };
                target
                    .and_then(|(p, i)| {
                        let word = flag_word(lookup(frame, ctx.externals, p)?)?;
                        Some(Value::from(bit(word, i)))
                    })
                    .or_else(|| default.clone())
            }

            Derivation::Map { from, map, default } => self
                .eval(from, frame, ctx)
                .and_then(|v| map_key(&v))
                .and_then(|k| map.get(&k).cloned())
                .or_else(|| default.clone()),

            Derivation::JournalEvent {
                event,
                field,
                category,
                default,
            } => {
                let matched = frame
                    .event_name()
                    .filter(|name| self.event_matches(event, category.as_deref(), name));
                let value = match (matched, field) {
                    (Some(_), Some(field)) => lookup(frame, ctx.externals, field).cloned(),
                    (Some(name), None) => Some(Value::String(name.to_string())),
                    (None, _) => None,
                };
                value.or_else(|| default.clone())
            }

            // Boolean combinators use three-valued logic: a term that cannot
            // be decided on this frame leaves the result undecided unless a
            // definite term settles it.
            Derivation::FirstMatch { cases, default } => {
                for case in cases {
                    if self.decide(&case.when, frame, ctx)? {
                        return Some(case.value.clone());
                    }
                }
                default.clone()
            }

            Derivation::And { terms } => {
                let mut undecided = false;
                for t in terms {
                    match self.decide(t, frame, ctx) {
                        Some(false) => return Some(Value::Bool(false)),
                        Some(true) => {}
                        None => undecided = true,
                    }
                }
                (!undecided).then_some(Value::Bool(true))
            }

            Derivation::Or { terms } => {
                let mut undecided = false;
                for t in terms {
                    match self.decide(t, frame, ctx) {
                        Some(true) => return Some(Value::Bool(true)),
                        Some(false) => {}
                        None => undecided = true,
                    }
                }
                (!undecided).then_some(Value::Bool(false))
            }

            Derivation::Not { term } => self.decide(term, frame, ctx).map(|b| Value::Bool(!b)),

            Derivation::Recent {
                event,
                within_seconds,
            } => Some(Value::Bool(ctx.recency.within(
                event,
                *within_seconds,
                ctx.now,
            ))),

            Derivation::Compare { from, cmp, value } => {
                let lhs = self.eval(from, frame, ctx)?;
                cmp.apply(&lhs, value).map(Value::Bool)
            }

            Derivation::Literal { value } => Some(value.clone()),

            Derivation::Combine { combiner, inputs } => {
                let values: Vec<Option<Value>> =
                    inputs.iter().map(|i| self.eval(i, frame, ctx)).collect();
                self.combiners.get(combiner)?.combine(&values)
            }
        }
    }

    /// Truthiness of `expr`, or `None` when this frame cannot decide it.
    fn decide(&self, expr: &Derivation, frame: &Frame, ctx: &DeriveContext<'_>) -> Option<bool> {
        self.eval(expr, frame, ctx).map(|v| truthy(Some(&v)))
    }

    fn event_matches(&self, pattern: &str, category: Option<&str>, name: &str) -> bool {
        if pattern != ANY_EVENT {
            return pattern == name;
        }
        match category {
            Some(c) => self
                .catalog
                .category(c)
                .is_some_and(|members| members.iter().any(|m| m == name)),
            None => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
