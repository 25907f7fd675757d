use super::{config_or_default, load_catalog};
use crate::output::{cell, print_json, print_table};
use anyhow::Context;
use chrono::{DateTime, Utc};
use flagdeck_core::derive::{DeriveContext, Deriver};
use flagdeck_core::frame::{Externals, Frame};
use flagdeck_core::recency::RecencyIndex;
use flagdeck_core::types::Source;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// One frame plus whatever context it should be derived in.
#[derive(Debug, Deserialize)]
struct FrameFile {
    source: Source,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    state: Option<Value>,
    #[serde(default)]
    capi: Option<Value>,
    /// Discrete events seen before this frame, with their times.
    #[serde(default)]
    recent: BTreeMap<String, DateTime<Utc>>,
}

pub fn run(root: &Path, frame_path: &Path, at: Option<&str>, json: bool) -> anyhow::Result<()> {
    let config = config_or_default(root)?;
    let catalog = Arc::new(load_catalog(root, &config)?);
    let deriver = Deriver::new(Arc::clone(&catalog))?;

    let data = std::fs::read_to_string(frame_path)
        .with_context(|| format!("failed to read {}", frame_path.display()))?;
    let input: FrameFile = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse frame in {}", frame_path.display()))?;

    let now = match at {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("--at '{s}' is not an RFC 3339 timestamp"))?
            .with_timezone(&Utc),
        None => input.timestamp.unwrap_or_else(Utc::now),
    };

    let mut frame = Frame::new(input.source, input.timestamp.unwrap_or(now), input.data);
    frame.event = input.event;

    let mut recency = RecencyIndex::new();
    for (event, seen) in &input.recent {
        recency.record(event, *seen);
    }
    if let Some(event) = frame.event_name() {
        recency.record(event, frame.timestamp);
    }

    let externals = Externals {
        state: input.state,
        capi: input.capi,
    };
    let ctx = DeriveContext {
        recency: &recency,
        externals: &externals,
        now,
    };
    let derived = deriver.derive(&frame, &ctx);

    if json {
        return print_json(&derived);
    }

    let rows: Vec<Vec<String>> = catalog
        .signals()
        .iter()
        .filter_map(|signal| {
            let value = derived.snapshot.get(&signal.id)?;
            let note = if derived.snapshot.is_fallback(&signal.id) {
                "(default)".to_string()
            } else {
                signal.label_for(value).unwrap_or_default().to_string()
            };
            Some(vec![signal.id.clone(), cell(value), note])
        })
        .collect();
    print_table(&["SIGNAL", "VALUE", ""], &rows);

    for diag in &derived.diagnostics {
        println!("warning: {diag}");
    }
    Ok(())
}
