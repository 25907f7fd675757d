//! Edge-triggered dispatch.
//!
//! The engine remembers the last definite result per `(rule, actor)` and
//! only hands back actions when that result changes. A steadily true
//! condition on a polled stream therefore fires once, not once per tick.

use crate::derive::Snapshot;
use crate::frame::{Externals, Frame};
use crate::matcher;
use crate::rules::{Action, Rule, RuleSet};
use crate::types::{ActorId, MatchResult, RuleId};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// ActionBatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    /// The rule became true; carries its `then` actions.
    Rising,
    /// The rule became false; carries its `else` actions.
    Falling,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Rising => f.write_str("rising"),
            Edge::Falling => f.write_str("falling"),
        }
    }
}

/// The actions one transition of one rule produced, in declared order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionBatch {
    pub rule_id: RuleId,
    pub actor: ActorId,
    pub edge: Edge,
    pub actions: Vec<Action>,
}

// ---------------------------------------------------------------------------
// MatchMemory
// ---------------------------------------------------------------------------

/// Last definite result per `(rule, actor)`, tied to one rule-set generation.
#[derive(Debug, Clone, Default)]
pub struct MatchMemory {
    generation: u64,
    last: HashMap<(RuleId, ActorId), MatchResult>,
}

impl MatchMemory {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            last: HashMap::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, rule: &RuleId, actor: &ActorId) -> Option<MatchResult> {
        self.last.get(&(rule.clone(), actor.clone())).copied()
    }

    fn set(&mut self, rule: &RuleId, actor: &ActorId, result: MatchResult) {
        self.last.insert((rule.clone(), actor.clone()), result);
    }

    /// Forget everything and attach to a new generation.
    pub fn reset(&mut self, generation: u64) {
        self.generation = generation;
        self.last.clear();
    }

    /// Forget one actor's history, leaving other actors untouched.
    pub fn forget_actor(&mut self, actor: &ActorId) {
        self.last.retain(|(_, a), _| a != actor);
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

// ---------------------------------------------------------------------------
// RuleEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Arc<RuleSet>,
    memory: MatchMemory,
}

impl RuleEngine {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        let memory = MatchMemory::new(rules.generation());
        Self { rules, memory }
    }

    pub fn rules(&self) -> &Arc<RuleSet> {
        &self.rules
    }

    pub fn memory(&self) -> &MatchMemory {
        &self.memory
    }

    /// Swap in a new rule set. All match memory is discarded: history for
    /// the previous set's rule IDs means nothing to the new one.
    pub fn reload(&mut self, rules: Arc<RuleSet>) {
        tracing::info!(
            from = self.rules.generation(),
            to = rules.generation(),
            rules = rules.len(),
            "reloaded rule set; match memory cleared"
        );
        self.memory.reset(rules.generation());
        self.rules = rules;
    }

    /// Evaluate without touching memory. The actor plays no part in the
    /// result; it is accepted so call sites read the same as `dispatch`.
    pub fn evaluate(
        &self,
        rule: &Rule,
        _actor: &ActorId,
        frame: &Frame,
        externals: &Externals,
        snapshot: &Snapshot,
    ) -> MatchResult {
        matcher::evaluate(rule, frame, externals, snapshot)
    }

    /// Compare `result` against memory and return the actions for a
    /// transition, if this is one.
    ///
    /// `Indeterminate` never changes memory. With no prior memory any
    /// definite result counts as a transition.
    pub fn dispatch(&mut self, rule: &Rule, actor: &ActorId, result: MatchResult) -> Option<ActionBatch> {
        if !result.is_determinate() {
            return None;
        }
        if self.memory.generation() != self.rules.generation() {
            self.memory.reset(self.rules.generation());
        }
        if self.memory.get(&rule.id, actor) == Some(result) {
            return None;
        }
        self.memory.set(&rule.id, actor, result);

        let (edge, actions) = match result {
            MatchResult::Match => (Edge::Rising, &rule.then),
            MatchResult::NoMatch => (Edge::Falling, &rule.otherwise),
            MatchResult::Indeterminate => return None,
        };
        if actions.is_empty() {
            tracing::debug!(rule = %rule.id, %actor, %edge, "transition with no actions");
            return None;
        }
        tracing::debug!(rule = %rule.id, %actor, %edge, actions = actions.len(), "dispatching");
        Some(ActionBatch {
            rule_id: rule.id.clone(),
            actor: actor.clone(),
            edge,
            actions: actions.clone(),
        })
    }

    /// Evaluate and dispatch every rule, in rule-set order.
    pub fn process(
        &mut self,
        actor: &ActorId,
        frame: &Frame,
        externals: &Externals,
        snapshot: &Snapshot,
    ) -> Vec<ActionBatch> {
        let rules = Arc::clone(&self.rules);
        rules
            .rules()
            .iter()
            .filter_map(|rule| {
                let result = self.evaluate(rule, actor, frame, externals, snapshot);
                tracing::trace!(rule = %rule.id, %actor, %result, "evaluated");
                self.dispatch(rule, actor, result)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::derive::{DeriveContext, Deriver};
    use crate::recency::RecencyIndex;
    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;

    const CATALOG: &str = r#"
flag_groups:
  ship:
    path: dashboard.Flags
    bits: { docked: 0, hardpoints: 6 }
signals:
  - id: hardpoints
    type: enum
    values: [ { value: retracted }, { value: deployed } ]
    derive:
      op: map
      from: { op: bitfield, field_ref: ship, bit: hardpoints }
      map: { "0": retracted, "1": deployed }
"#;

    const RULES: &str = r#"
rules:
  - title: Hardpoints deployed
    when: { all: [ { signal: hardpoints, eq: deployed } ] }
    then: [ { type: set_flag, token: HARDPOINTS } ]
    else: [ { type: clear_flag, token: HARDPOINTS } ]
  - title: Hardpoints out, no else
    when: { all: [ { signal: hardpoints, eq: deployed } ] }
    then: [ { type: log, message: weapons hot } ]
"#;

    fn catalog() -> Arc<Catalog> {
        Arc::new(Catalog::from_yaml(CATALOG).unwrap())
    }

    fn engine() -> RuleEngine {
        RuleEngine::new(Arc::new(RuleSet::from_yaml(RULES, &catalog()).unwrap()))
    }

    fn rule(engine: &RuleEngine, i: usize) -> Rule {
        engine.rules().rules()[i].clone()
    }

    fn t0() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn steady_match_fires_once() {
        let mut e = engine();
        let r = rule(&e, 0);
        let cmdr = ActorId::from("jameson");
        let first = e.dispatch(&r, &cmdr, MatchResult::Match).unwrap();
        assert_eq!(first.edge, Edge::Rising);
        assert_eq!(
            first.actions,
            vec![Action::SetFlag {
                token: "HARDPOINTS".to_string()
            }]
        );
        for _ in 0..5 {
            assert!(e.dispatch(&r, &cmdr, MatchResult::Match).is_none());
        }
    }

    #[test]
    fn indeterminate_is_skipped() {
        let mut e = engine();
        let r = rule(&e, 0);
        let cmdr = ActorId::from("jameson");
        assert!(e.dispatch(&r, &cmdr, MatchResult::Indeterminate).is_none());
        assert!(e.memory().is_empty());

        e.dispatch(&r, &cmdr, MatchResult::Match).unwrap();
        assert!(e.dispatch(&r, &cmdr, MatchResult::Indeterminate).is_none());
        // Indeterminate did not reset memory, so no new rising edge.
        assert!(e.dispatch(&r, &cmdr, MatchResult::Match).is_none());
        assert_eq!(e.memory().get(&r.id, &cmdr), Some(MatchResult::Match));
    }

    #[test]
    fn re_arms_after_falling_edge() {
        let mut e = engine();
        let with_else = rule(&e, 0);
        let without_else = rule(&e, 1);
        let cmdr = ActorId::from("jameson");

        let seq = [MatchResult::Match, MatchResult::NoMatch, MatchResult::Match];
        let fired: Vec<_> = seq
            .iter()
            .filter_map(|r| e.dispatch(&with_else, &cmdr, *r))
            .map(|b| b.edge)
            .collect();
        assert_eq!(fired, vec![Edge::Rising, Edge::Falling, Edge::Rising]);

        let fired = seq
            .iter()
            .filter_map(|r| e.dispatch(&without_else, &cmdr, *r))
            .count();
        assert_eq!(fired, 2);
    }

    #[test]
    fn first_no_match_fires_else_when_declared() {
        let mut e = engine();
        let r = rule(&e, 0);
        let batch = e.dispatch(&r, &ActorId::from("a"), MatchResult::NoMatch).unwrap();
        assert_eq!(batch.edge, Edge::Falling);
        assert_eq!(
            batch.actions,
            vec![Action::ClearFlag {
                token: "HARDPOINTS".to_string()
            }]
        );
    }

    #[test]
    fn actors_are_isolated() {
        let mut e = engine();
        let r = rule(&e, 0);
        let a = ActorId::from("alpha");
        let b = ActorId::from("bravo");
        assert!(e.dispatch(&r, &a, MatchResult::Match).is_some());
        assert!(e.dispatch(&r, &b, MatchResult::Match).is_some());
        assert!(e.dispatch(&r, &a, MatchResult::Match).is_none());
        assert!(e.dispatch(&r, &b, MatchResult::NoMatch).is_some());
        assert_eq!(e.memory().get(&r.id, &a), Some(MatchResult::Match));

        e.memory.forget_actor(&b);
        assert_eq!(e.memory().get(&r.id, &b), None);
        assert_eq!(e.memory().get(&r.id, &a), Some(MatchResult::Match));
    }

    #[test]
    fn reload_clears_memory() {
        let mut e = engine();
        let r = rule(&e, 0);
        let cmdr = ActorId::from("jameson");
        e.dispatch(&r, &cmdr, MatchResult::Match).unwrap();

        let fresh = Arc::new(RuleSet::from_yaml(RULES, &catalog()).unwrap());
        e.reload(fresh);
        assert!(e.memory().is_empty());
        assert_eq!(e.memory().generation(), e.rules().generation());
        assert!(e.dispatch(&r, &cmdr, MatchResult::Match).is_some());
    }

    #[test]
    fn alternating_frames_fire_every_transition() {
        let catalog = catalog();
        let deriver = Deriver::new(Arc::clone(&catalog)).unwrap();
        let rules = "rules:\n  - title: HP\n    when: { all: [ { signal: hardpoints, eq: deployed } ] }\n    then: [ { type: set_flag, token: HP } ]\n    else: [ { type: clear_flag, token: HP } ]\n";
        let mut e = RuleEngine::new(Arc::new(RuleSet::from_yaml(rules, &catalog).unwrap()));
        let recency = RecencyIndex::new();
        let externals = Externals::default();
        let cmdr = ActorId::from("jameson");

        let mut batches = Vec::new();
        for i in 0..10 {
            let flags = if i % 2 == 0 { 64 } else { 0 };
            let frame = Frame::dashboard(t0() + Duration::seconds(i), json!({ "Flags": flags }));
            let ctx = DeriveContext {
                recency: &recency,
                externals: &externals,
                now: frame.timestamp,
            };
            let snapshot = deriver.derive_all(&frame, &ctx);
            batches.extend(e.process(&cmdr, &frame, &externals, &snapshot));
        }
        assert_eq!(batches.len(), 10);
        assert!(batches
            .iter()
            .enumerate()
            .all(|(i, b)| b.edge == if i % 2 == 0 { Edge::Rising } else { Edge::Falling }));
    }

    #[test]
    fn journal_frames_do_not_break_the_edge() {
        let catalog = catalog();
        let deriver = Deriver::new(Arc::clone(&catalog)).unwrap();
        let mut e = RuleEngine::new(Arc::new(RuleSet::from_yaml(RULES, &catalog).unwrap()));
        let recency = RecencyIndex::new();
        let externals = Externals::default();
        let cmdr = ActorId::from("jameson");

        let frames = [
            Frame::dashboard(t0(), json!({ "Flags": 64 })),
            Frame::journal(t0(), json!({ "event": "Music" })),
            Frame::dashboard(t0(), json!({ "Flags": 64 })),
        ];
        let mut fired = 0;
        for frame in &frames {
            let ctx = DeriveContext {
                recency: &recency,
                externals: &externals,
                now: frame.timestamp,
            };
            let snapshot = deriver.derive_all(frame, &ctx);
            fired += e.process(&cmdr, frame, &externals, &snapshot).len();
        }
        // One rising edge per rule, nothing from the journal frame.
        assert_eq!(fired, 2);
    }

    #[test]
    fn filtered_rule_pulses_on_its_event() {
        let catalog = catalog();
        let deriver = Deriver::new(Arc::clone(&catalog)).unwrap();
        let rules = "rules:\n  - title: Docked\n    when: { event: Docked, any: [ { field: event, eq: Docked } ] }\n    then: [ { type: log, message: docked } ]\n";
        let mut e = RuleEngine::new(Arc::new(RuleSet::from_yaml(rules, &catalog).unwrap()));
        let recency = RecencyIndex::new();
        let externals = Externals::default();
        let cmdr = ActorId::from("jameson");

        let frames = [
            Frame::journal(t0(), json!({ "event": "Docked" })),
            Frame::dashboard(t0(), json!({ "Flags": 1 })),
            Frame::journal(t0(), json!({ "event": "Docked" })),
        ];
        let mut edges = Vec::new();
        for frame in &frames {
            let ctx = DeriveContext {
                recency: &recency,
                externals: &externals,
                now: frame.timestamp,
            };
            let snapshot = deriver.derive_all(frame, &ctx);
            let result = e.evaluate(&e.rules().rules()[0].clone(), &cmdr, frame, &externals, &snapshot);
            edges.push(result);
            e.process(&cmdr, frame, &externals, &snapshot);
        }
        // The filter rejects the dashboard frame outright, which re-arms the
        // rule for the next Docked event.
        assert_eq!(
            edges,
            vec![MatchResult::Match, MatchResult::NoMatch, MatchResult::Match]
        );
        assert_eq!(e.memory().get(&RuleId::new("docked"), &cmdr), Some(MatchResult::Match));
    }
}
