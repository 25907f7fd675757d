//! Reference orchestrator: drives frames through both engines per actor.
//!
//! Owns what the engines deliberately do not: each actor's recency index
//! and the set of flag tokens its rules have raised.

use crate::derive::{DeriveContext, Deriver, Diagnostic, Snapshot};
use crate::engine::{ActionBatch, RuleEngine};
use crate::frame::{Externals, Frame};
use crate::recency::{RecencyIndex, DEFAULT_WINDOW_SECONDS};
use crate::rules::{Action, RuleSet};
use crate::types::ActorId;
use chrono::Duration;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Result of ingesting one frame.
#[derive(Debug, Clone, Serialize)]
pub struct Tick {
    pub actor: ActorId,
    pub snapshot: Snapshot,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub batches: Vec<ActionBatch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Default)]
struct ActorState {
    recency: RecencyIndex,
    flags: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct Session {
    deriver: Deriver,
    engine: RuleEngine,
    window: Duration,
    actors: BTreeMap<ActorId, ActorState>,
}

impl Session {
    pub fn new(deriver: Deriver, rules: Arc<RuleSet>) -> Self {
        Self {
            deriver,
            engine: RuleEngine::new(rules),
            window: Duration::seconds(DEFAULT_WINDOW_SECONDS as i64),
            actors: BTreeMap::new(),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    /// Prune, record, derive, dispatch, apply flags.
    pub fn ingest(&mut self, actor: &ActorId, frame: &Frame, externals: &Externals) -> Tick {
        let state = self.actors.entry(actor.clone()).or_default();

        state.recency.prune(frame.timestamp, self.window);
        if let Some(event) = frame.event_name() {
            state.recency.record(event, frame.timestamp);
        }

        let ctx = DeriveContext {
            recency: &state.recency,
            externals,
            now: frame.timestamp,
        };
        let derived = self.deriver.derive(frame, &ctx);

        let batches = self
            .engine
            .process(actor, frame, externals, &derived.snapshot);
        for batch in &batches {
            apply(&mut state.flags, batch);
        }

        Tick {
            actor: actor.clone(),
            snapshot: derived.snapshot,
            batches,
            diagnostics: derived.diagnostics,
        }
    }

    /// Swap in a new rule set; match memory for every actor is discarded.
    /// Raised flags stay until a rule of the new set clears them.
    pub fn reload_rules(&mut self, rules: Arc<RuleSet>) {
        self.engine.reload(rules);
    }

    pub fn flags(&self, actor: &ActorId) -> Option<&BTreeSet<String>> {
        self.actors.get(actor).map(|s| &s.flags)
    }

    pub fn recency(&self, actor: &ActorId) -> Option<&RecencyIndex> {
        self.actors.get(actor).map(|s| &s.recency)
    }

    pub fn actors(&self) -> impl Iterator<Item = &ActorId> {
        self.actors.keys()
    }
}

fn apply(flags: &mut BTreeSet<String>, batch: &ActionBatch) {
    for action in &batch.actions {
        match action {
            Action::SetFlag { token } => {
                flags.insert(token.clone());
            }
            Action::ClearFlag { token } => {
                flags.remove(token);
            }
            Action::Log { message } => {
                tracing::info!(rule = %batch.rule_id, actor = %batch.actor, "{message}");
            }
            Action::Emit { name, payload } => {
                tracing::debug!(rule = %batch.rule_id, actor = %batch.actor, %name, %payload, "emit");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::engine::Edge;
    use crate::types::Source;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    const RULES: &str = r#"
rules:
  - title: Just docked
    when: { all: [ { signal: docking_state, eq: just_docked } ] }
    then: [ { type: set_flag, token: JUST_DOCKED } ]
    else: [ { type: clear_flag, token: JUST_DOCKED } ]
  - title: Hardpoints
    when: { source: dashboard, all: [ { signal: hardpoints, eq: deployed } ] }
    then: [ { type: set_flag, token: HARDPOINTS } ]
    else: [ { type: clear_flag, token: HARDPOINTS } ]
"#;

    fn session() -> Session {
        let catalog = Arc::new(Catalog::builtin().unwrap());
        let rules = Arc::new(RuleSet::from_yaml(RULES, &catalog).unwrap());
        Session::new(Deriver::new(catalog).unwrap(), rules)
    }

    fn t0() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(secs)
    }

    #[test]
    fn docking_sequence_raises_and_clears_flag() {
        let mut s = session();
        let cmdr = ActorId::from("jameson");
        let ext = Externals::default();

        s.ingest(&cmdr, &Frame::journal(at(0), json!({"event": "Docked", "StationName": "Jameson Memorial"})), &ext);
        let tick = s.ingest(&cmdr, &Frame::dashboard(at(1), json!({"Flags": 1})), &ext);
        assert_eq!(tick.snapshot.get("docking_state"), Some(&json!("just_docked")));
        assert!(s.flags(&cmdr).unwrap().contains("JUST_DOCKED"));

        let tick = s.ingest(&cmdr, &Frame::dashboard(at(5), json!({"Flags": 1})), &ext);
        assert_eq!(tick.snapshot.get("docking_state"), Some(&json!("docked")));
        assert!(!s.flags(&cmdr).unwrap().contains("JUST_DOCKED"));
    }

    #[test]
    fn recency_is_pruned_to_window() {
        let mut s = session().with_window(Duration::seconds(10));
        let cmdr = ActorId::from("jameson");
        let ext = Externals::default();

        s.ingest(&cmdr, &Frame::journal(at(0), json!({"event": "Docked"})), &ext);
        assert!(s.recency(&cmdr).unwrap().last_seen("Docked").is_some());
        s.ingest(&cmdr, &Frame::dashboard(at(11), json!({"Flags": 0})), &ext);
        assert!(s.recency(&cmdr).unwrap().is_empty());
    }

    #[test]
    fn actors_keep_separate_state() {
        let mut s = session();
        let a = ActorId::from("alpha");
        let b = ActorId::from("bravo");
        let ext = Externals::default();

        s.ingest(&a, &Frame::journal(at(0), json!({"event": "Docked"})), &ext);
        let tick = s.ingest(&b, &Frame::dashboard(at(1), json!({"Flags": 1})), &ext);
        // bravo never saw the Docked event
        assert_eq!(tick.snapshot.get("docking_state"), Some(&json!("docked")));

        s.ingest(&a, &Frame::dashboard(at(1), json!({"Flags": 64})), &ext);
        assert!(s.flags(&a).unwrap().contains("HARDPOINTS"));
        assert!(!s.flags(&b).unwrap().contains("HARDPOINTS"));
        assert_eq!(s.actors().count(), 2);
    }

    #[test]
    fn reload_rearms_rules() {
        let mut s = session();
        let cmdr = ActorId::from("jameson");
        let ext = Externals::default();
        let armed = Frame::dashboard(at(0), json!({"Flags": 64}));

        assert_eq!(s.ingest(&cmdr, &armed, &ext).batches.len(), 2);
        assert!(s.ingest(&cmdr, &armed, &ext).batches.is_empty());

        let catalog = Arc::clone(s.deriver.catalog());
        s.reload_rules(Arc::new(RuleSet::from_yaml(RULES, &catalog).unwrap()));
        assert_eq!(s.ingest(&cmdr, &armed, &ext).batches.len(), 2);
        assert!(s.flags(&cmdr).unwrap().contains("HARDPOINTS"));
    }

    #[test]
    fn journal_frames_between_dashboards_fire_one_docking_edge() {
        let catalog = Arc::new(Catalog::builtin().unwrap());
        let rules = Arc::new(RuleSet::from_yaml(RuleSet::starter_source(), &catalog).unwrap());
        let mut s = Session::new(Deriver::new(catalog).unwrap(), rules);
        let cmdr = ActorId::from("jameson");
        let ext = Externals::default();
        let ms = |n: i64| t0() + Duration::milliseconds(n);

        let frames = [
            Frame::journal(ms(0), json!({"event": "Docked", "StationName": "Jameson Memorial"})),
            Frame::dashboard(ms(500), json!({"Flags": 1})),
            Frame::journal(ms(1000), json!({"event": "Music", "MusicTrack": "Starport"})),
            Frame::dashboard(ms(1500), json!({"Flags": 1})),
        ];

        let mut edges = Vec::new();
        for frame in &frames {
            let tick = s.ingest(&cmdr, frame, &ext);
            if frame.source == Source::Journal {
                assert!(tick.snapshot.derived("docking_state").is_none());
            }
            edges.extend(
                tick.batches
                    .into_iter()
                    .filter(|b| b.rule_id.as_str() == "just-docked")
                    .map(|b| b.edge),
            );
        }

        assert_eq!(edges, vec![Edge::Rising]);
        assert!(s.flags(&cmdr).unwrap().contains("JUST_DOCKED"));
    }

    #[test]
    fn tick_serializes_snapshot_as_map() {
        let mut s = session();
        let tick = s.ingest(
            &ActorId::from("jameson"),
            &Frame::dashboard(at(0), json!({"Flags": 64, "GuiFocus": 6})),
            &Externals::default(),
        );
        let v = serde_json::to_value(&tick).unwrap();
        assert_eq!(v["actor"], json!("jameson"));
        assert_eq!(v["snapshot"]["gui_focus"], json!("galaxy_map"));
        // just-docked falls first, hardpoints rises second
        assert_eq!(v["batches"][0]["edge"], json!("falling"));
        assert_eq!(v["batches"][1]["edge"], json!("rising"));
    }
}
