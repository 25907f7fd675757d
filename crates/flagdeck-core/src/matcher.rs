//! Three-valued evaluation of a rule against one frame and its snapshot.

use crate::derive::Snapshot;
use crate::frame::{lookup, Externals, Frame};
use crate::rules::{Condition, Leaf, Operand, Rule, Test};
use crate::types::MatchResult;
use crate::value::{bit, contains, flag_word};
use serde_json::Value;

/// Evaluate `rule` against a frame.
///
/// A filter mismatch is a definite `NoMatch` and skips the conditions.
/// A leaf whose operand is absent from this frame (including a signal that
/// fell back to its default) is `Indeterminate`.
pub fn evaluate(rule: &Rule, frame: &Frame, externals: &Externals, snapshot: &Snapshot) -> MatchResult {
    if !rule.filter.accepts(frame.source, frame.event_name()) {
        return MatchResult::NoMatch;
    }

    let eval_all = |conds: &[Condition]| {
        MatchResult::all(conds.iter().map(|c| condition(c, frame, externals, snapshot)))
    };
    let eval_any = |conds: &[Condition]| {
        MatchResult::any(conds.iter().map(|c| condition(c, frame, externals, snapshot)))
    };

    match (&rule.all, &rule.any) {
        (Some(all), Some(any)) => eval_all(all).and(eval_any(any)),
        (Some(all), None) => eval_all(all),
        (None, Some(any)) => eval_any(any),
        // Rejected at load; treat as a rule that can never be decided.
        (None, None) => MatchResult::Indeterminate,
    }
}

fn condition(cond: &Condition, frame: &Frame, externals: &Externals, snapshot: &Snapshot) -> MatchResult {
    match cond {
        Condition::All(inner) => {
            MatchResult::all(inner.iter().map(|c| condition(c, frame, externals, snapshot)))
        }
        Condition::Any(inner) => {
            MatchResult::any(inner.iter().map(|c| condition(c, frame, externals, snapshot)))
        }
        Condition::Leaf(leaf) => evaluate_leaf(leaf, frame, externals, snapshot),
    }
}

/// Evaluate a single leaf.
pub fn evaluate_leaf(leaf: &Leaf, frame: &Frame, externals: &Externals, snapshot: &Snapshot) -> MatchResult {
    let operand = match &leaf.operand {
        Operand::Signal(id) => snapshot.derived(id),
        Operand::Field(path) | Operand::Flags { path, .. } => lookup(frame, externals, path),
    };
    let Some(operand) = operand else {
        return MatchResult::Indeterminate;
    };
    test(&leaf.test, operand)
}

fn test(test: &Test, operand: &Value) -> MatchResult {
    match test {
        Test::Compare(cmp, literal) => match cmp.apply(operand, literal) {
            Some(b) => MatchResult::from_bool(b),
            // An ordering test against a non-number cannot be decided.
            None => MatchResult::Indeterminate,
        },
        Test::In(set) => MatchResult::from_bool(contains(set, operand)),
        Test::Bits {
            all_of,
            any_of,
            none_of,
        } => {
            let Some(word) = flag_word(operand) else {
                return MatchResult::Indeterminate;
            };
            let set = |i: &u8| bit(word, *i) == 1;
            MatchResult::from_bool(
                all_of.iter().all(set)
                    && (any_of.is_empty() || any_of.iter().any(set))
                    && !none_of.iter().any(set),
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
