use crate::types::Source;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One raw update from a single source stream. Frames are never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub source: Source,
    /// Discrete event name. For journal frames this falls back to the
    /// `event` field of `data` when not set explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(source: Source, timestamp: DateTime<Utc>, data: Value) -> Self {
        Self {
            source,
            event: None,
            timestamp,
            data,
        }
    }

    pub fn dashboard(timestamp: DateTime<Utc>, data: Value) -> Self {
        Self::new(Source::Dashboard, timestamp, data)
    }

    pub fn journal(timestamp: DateTime<Utc>, data: Value) -> Self {
        Self::new(Source::Journal, timestamp, data)
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// The discrete event this frame carries, if it is a journal frame.
    pub fn event_name(&self) -> Option<&str> {
        if self.source != Source::Journal {
            return None;
        }
        self.event
            .as_deref()
            .or_else(|| self.data.get("event").and_then(Value::as_str))
    }
}

// ---------------------------------------------------------------------------
// Externals
// ---------------------------------------------------------------------------

/// Read-only documents visible to every frame: persisted session state and
/// the last external API snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Externals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capi: Option<Value>,
}

// ---------------------------------------------------------------------------
// Path lookup
// ---------------------------------------------------------------------------

/// Resolve a dotted path against a frame.
///
/// A leading namespace segment (`dashboard`, `journal`, `state`, `capi`)
/// selects the document: the frame's own data when the frame is of that
/// source, otherwise the matching external document. Paths without a known
/// namespace read the frame's data directly. `null` counts as absent.
pub fn lookup<'a>(frame: &'a Frame, externals: &'a Externals, path: &str) -> Option<&'a Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    let Ok(namespace) = head.parse::<Source>() else {
        return walk(&frame.data, path);
    };

    let root = if namespace == frame.source {
        Some(&frame.data)
    } else {
        match namespace {
            Source::State => externals.state.as_ref(),
            Source::Capi => externals.capi.as_ref(),
            Source::Dashboard | Source::Journal => None,
        }
    }?;

    match rest {
        Some(rest) => walk(root, rest),
        None => (!root.is_null()).then_some(root),
    }
}

fn walk<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    (!current.is_null()).then_some(current)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn namespace_selects_frame_data() {
        let frame = Frame::dashboard(ts(), json!({"Flags": 5, "Fuel": {"FuelMain": 16.0}}));
        let ext = Externals::default();
        assert_eq!(lookup(&frame, &ext, "dashboard.Flags"), Some(&json!(5)));
        assert_eq!(lookup(&frame, &ext, "dashboard.Fuel.FuelMain"), Some(&json!(16.0)));
        assert_eq!(lookup(&frame, &ext, "Flags"), Some(&json!(5)));
        assert_eq!(lookup(&frame, &ext, "journal.Flags"), None);
    }

    #[test]
    fn externals_are_visible_from_any_frame() {
        let frame = Frame::journal(ts(), json!({"event": "Docked"}));
        let ext = Externals {
            state: Some(json!({"StarSystem": "Sol"})),
            capi: Some(json!({"commander": {"credits": 1000}})),
        };
        assert_eq!(lookup(&frame, &ext, "state.StarSystem"), Some(&json!("Sol")));
        assert_eq!(lookup(&frame, &ext, "capi.commander.credits"), Some(&json!(1000)));
    }

    #[test]
    fn missing_segments_and_nulls_are_absent() {
        let frame = Frame::journal(ts(), json!({"event": "Docked", "StationName": null, "List": [1, 2]}));
        let ext = Externals::default();
        assert_eq!(lookup(&frame, &ext, "journal.StationName"), None);
        assert_eq!(lookup(&frame, &ext, "journal.Nope.Deeper"), None);
        assert_eq!(lookup(&frame, &ext, "journal.List.1"), Some(&json!(2)));
        assert_eq!(lookup(&frame, &ext, "state.StarSystem"), None);
    }

    #[test]
    fn journal_event_name_falls_back_to_data() {
        let frame = Frame::journal(ts(), json!({"event": "Undocked"}));
        assert_eq!(frame.event_name(), Some("Undocked"));
        let frame = frame.with_event("Docked");
        assert_eq!(frame.event_name(), Some("Docked"));
        let dash = Frame::dashboard(ts(), json!({"event": "Status"}));
        assert_eq!(dash.event_name(), None);
    }

    #[test]
    fn frame_json_shape() {
        let raw = r#"{"source":"journal","timestamp":"2026-03-01T12:00:00Z","data":{"event":"Docked"}}"#;
        let frame: Frame = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.source, Source::Journal);
        assert_eq!(frame.event_name(), Some("Docked"));
    }
}
