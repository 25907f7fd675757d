use super::{config_or_default, load_catalog, load_rules};
use crate::output::{print_json, print_table};
use clap::Subcommand;
use flagdeck_core::rules::Rule;
use serde::Serialize;
use std::path::Path;

#[derive(Subcommand)]
pub enum RulesSubcommand {
    /// Load the rule document against the catalog
    Validate,

    /// List loaded rules
    List,
}

#[derive(Serialize)]
struct RuleSummary<'a> {
    id: &'a str,
    title: &'a str,
    source: Option<String>,
    events: &'a [String],
    then: usize,
    #[serde(rename = "else")]
    otherwise: usize,
}

impl<'a> From<&'a Rule> for RuleSummary<'a> {
    fn from(rule: &'a Rule) -> Self {
        Self {
            id: rule.id.as_str(),
            title: &rule.title,
            source: rule.filter.source.map(|s| s.to_string()),
            events: &rule.filter.events,
            then: rule.then.len(),
            otherwise: rule.otherwise.len(),
        }
    }
}

pub fn run(root: &Path, subcmd: RulesSubcommand, json: bool) -> anyhow::Result<()> {
    let config = config_or_default(root)?;
    let catalog = load_catalog(root, &config)?;
    let rules = load_rules(root, &config, &catalog)?;

    match subcmd {
        RulesSubcommand::Validate => {
            if json {
                print_json(&serde_json::json!({ "valid": true, "rules": rules.len() }))?;
            } else {
                println!("Rules are valid: {} rules.", rules.len());
            }
        }
        RulesSubcommand::List => {
            let summaries: Vec<RuleSummary<'_>> = rules.rules().iter().map(RuleSummary::from).collect();
            if json {
                return print_json(&summaries);
            }
            if summaries.is_empty() {
                println!("No rules.");
                return Ok(());
            }
            let rows: Vec<Vec<String>> = summaries
                .iter()
                .map(|r| {
                    let filter = match (&r.source, r.events.is_empty()) {
                        (Some(s), true) => s.clone(),
                        (Some(s), false) => format!("{s}:{}", r.events.join("|")),
                        (None, false) => r.events.join("|"),
                        (None, true) => "-".to_string(),
                    };
                    vec![
                        r.id.to_string(),
                        r.title.to_string(),
                        filter,
                        r.then.to_string(),
                        r.otherwise.to_string(),
                    ]
                })
                .collect();
            print_table(&["ID", "TITLE", "FILTER", "THEN", "ELSE"], &rows);
        }
    }
    Ok(())
}
