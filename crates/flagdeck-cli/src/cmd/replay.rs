use super::{config_or_default, load_catalog, load_rules};
use crate::output::{print_json, print_table};
use anyhow::Context;
use flagdeck_core::derive::Deriver;
use flagdeck_core::engine::ActionBatch;
use flagdeck_core::frame::{Externals, Frame};
use flagdeck_core::rules::Action;
use flagdeck_core::session::Session;
use flagdeck_core::types::ActorId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

/// One line of a frame log. `state` / `capi`, when present, replace the
/// actor's current external documents from this frame on.
#[derive(Debug, Deserialize)]
struct LogLine {
    #[serde(default)]
    actor: Option<String>,
    #[serde(flatten)]
    frame: Frame,
    #[serde(default)]
    state: Option<Value>,
    #[serde(default)]
    capi: Option<Value>,
}

#[derive(Serialize)]
struct Fired {
    line: usize,
    timestamp: String,
    #[serde(flatten)]
    batch: ActionBatch,
}

#[derive(Serialize)]
struct Report {
    frames: usize,
    batches: Vec<Fired>,
    flags: BTreeMap<String, Vec<String>>,
}

pub fn run(root: &Path, file: &Path, actor: Option<&str>, json: bool) -> anyhow::Result<()> {
    let config = config_or_default(root)?;
    let catalog = Arc::new(load_catalog(root, &config)?);
    let rules = Arc::new(load_rules(root, &config, &catalog)?);
    let deriver = Deriver::new(Arc::clone(&catalog))?;
    let mut session = Session::new(deriver, rules).with_window(config.recency_window()?);

    let default_actor = actor.unwrap_or(config.default_actor.as_str()).to_string();
    let reader = BufReader::new(
        std::fs::File::open(file).with_context(|| format!("failed to open {}", file.display()))?,
    );

    let mut externals: BTreeMap<ActorId, Externals> = BTreeMap::new();
    let mut report = Report {
        frames: 0,
        batches: Vec::new(),
        flags: BTreeMap::new(),
    };

    for (i, line) in reader.lines().enumerate() {
        let lineno = i + 1;
        let line = line.with_context(|| format!("failed to read line {lineno}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: LogLine = serde_json::from_str(&line)
            .with_context(|| format!("{}:{lineno}: malformed frame", file.display()))?;

        let actor = ActorId::new(entry.actor.unwrap_or_else(|| default_actor.clone()));
        let ext = externals.entry(actor.clone()).or_default();
        if entry.state.is_some() {
            ext.state = entry.state;
        }
        if entry.capi.is_some() {
            ext.capi = entry.capi;
        }

        let tick = session.ingest(&actor, &entry.frame, ext);
        report.frames += 1;

        for batch in tick.batches {
            if !json {
                println!(
                    "{}  {:<12} {} {}: {}",
                    entry.frame.timestamp.format("%H:%M:%S"),
                    batch.actor.as_str(),
                    batch.rule_id,
                    batch.edge,
                    describe(&batch.actions)
                );
            }
            report.batches.push(Fired {
                line: lineno,
                timestamp: entry.frame.timestamp.to_rfc3339(),
                batch,
            });
        }
    }

    let actors: Vec<ActorId> = session.actors().cloned().collect();
    for actor in actors {
        let raised = session
            .flags(&actor)
            .map(|f| f.iter().cloned().collect())
            .unwrap_or_default();
        report.flags.insert(actor.to_string(), raised);
    }

    if json {
        return print_json(&report);
    }

    println!(
        "\nReplayed {} frames, {} action batches.",
        report.frames,
        report.batches.len()
    );
    let rows: Vec<Vec<String>> = report
        .flags
        .iter()
        .map(|(actor, flags)| {
            let raised = if flags.is_empty() {
                "-".to_string()
            } else {
                flags.join(", ")
            };
            vec![actor.clone(), raised]
        })
        .collect();
    if !rows.is_empty() {
        println!();
        print_table(&["ACTOR", "FLAGS"], &rows);
    }
    Ok(())
}

fn describe(actions: &[Action]) -> String {
    actions
        .iter()
        .map(|a| match a {
            Action::SetFlag { token } => format!("+{token}"),
            Action::ClearFlag { token } => format!("-{token}"),
            Action::Log { message } => format!("log \"{message}\""),
            Action::Emit { name, .. } => format!("emit {name}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_line_with_actor_and_externals() {
        let line = r#"{"actor":"jameson","source":"journal","timestamp":"2026-03-01T12:00:00Z","data":{"event":"Docked"},"state":{"StarSystem":"Shinrarta Dezhra"}}"#;
        let entry: LogLine = serde_json::from_str(line).unwrap();
        assert_eq!(entry.actor.as_deref(), Some("jameson"));
        assert_eq!(entry.frame.event_name(), Some("Docked"));
        assert!(entry.state.is_some());
        assert!(entry.capi.is_none());
    }

    #[test]
    fn describe_actions() {
        let actions = vec![
            Action::SetFlag { token: "A".to_string() },
            Action::ClearFlag { token: "B".to_string() },
            Action::Emit { name: "pad".to_string(), payload: Value::Null },
        ];
        assert_eq!(describe(&actions), "+A, -B, emit pad");
    }
}
