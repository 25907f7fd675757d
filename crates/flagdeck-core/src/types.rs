use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// SignalType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Enum,
    Bool,
    Number,
    String,
    Array,
}

impl SignalType {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalType::Enum => "enum",
            SignalType::Bool => "bool",
            SignalType::Number => "number",
            SignalType::String => "string",
            SignalType::Array => "array",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// The stream a raw frame arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Polled status snapshot (flag words plus scalar fields).
    Dashboard,
    /// Discrete, event-driven notification.
    Journal,
    /// Persisted session state.
    State,
    /// External API snapshot.
    Capi,
}

impl Source {
    pub fn all() -> &'static [Source] {
        &[Source::Dashboard, Source::Journal, Source::State, Source::Capi]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Source::Dashboard => "dashboard",
            Source::Journal => "journal",
            Source::State => "state",
            Source::Capi => "capi",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dashboard" => Ok(Source::Dashboard),
            "journal" => Ok(Source::Journal),
            "state" => Ok(Source::State),
            "capi" => Ok(Source::Capi),
            _ => Err(format!("unknown source '{s}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity whose rule history is tracked independently (a commander).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// MatchResult
// ---------------------------------------------------------------------------

/// Three-valued outcome of evaluating a rule or one of its leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchResult {
    Match,
    NoMatch,
    Indeterminate,
}

impl MatchResult {
    pub fn from_bool(b: bool) -> Self {
        if b {
            MatchResult::Match
        } else {
            MatchResult::NoMatch
        }
    }

    pub fn is_determinate(self) -> bool {
        !matches!(self, MatchResult::Indeterminate)
    }

    /// Conjunction: a definite `NoMatch` wins over `Indeterminate`.
    pub fn and(self, other: MatchResult) -> MatchResult {
        match (self, other) {
            (MatchResult::NoMatch, _) | (_, MatchResult::NoMatch) => MatchResult::NoMatch,
            (MatchResult::Indeterminate, _) | (_, MatchResult::Indeterminate) => {
                MatchResult::Indeterminate
            }
            (MatchResult::Match, MatchResult::Match) => MatchResult::Match,
        }
    }

    /// Disjunction: a definite `Match` wins over `Indeterminate`.
    pub fn or(self, other: MatchResult) -> MatchResult {
        match (self, other) {
            (MatchResult::Match, _) | (_, MatchResult::Match) => MatchResult::Match,
            (MatchResult::Indeterminate, _) | (_, MatchResult::Indeterminate) => {
                MatchResult::Indeterminate
            }
            (MatchResult::NoMatch, MatchResult::NoMatch) => MatchResult::NoMatch,
        }
    }

    pub fn all(results: impl IntoIterator<Item = MatchResult>) -> MatchResult {
        let mut acc = MatchResult::Match;
        for r in results {
            acc = acc.and(r);
            if acc == MatchResult::NoMatch {
                break;
            }
        }
        acc
    }

    pub fn any(results: impl IntoIterator<Item = MatchResult>) -> MatchResult {
        let mut acc = MatchResult::NoMatch;
        for r in results {
            acc = acc.or(r);
            if acc == MatchResult::Match {
                break;
            }
        }
        acc
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchResult::Match => "match",
            MatchResult::NoMatch => "no_match",
            MatchResult::Indeterminate => "indeterminate",
        }
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
