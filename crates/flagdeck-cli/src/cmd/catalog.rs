use super::{config_or_default, load_catalog};
use crate::output::{cell, print_json, print_table};
use clap::Subcommand;
use flagdeck_core::types::SignalType;
use std::path::Path;

#[derive(Subcommand)]
pub enum CatalogSubcommand {
    /// Load the catalog and report whether it is valid
    Validate,

    /// List every signal, or show one in detail
    Show {
        /// Signal ID
        id: Option<String>,
    },

    /// List the discrete event names the catalog refers to
    Events,
}

pub fn run(root: &Path, subcmd: CatalogSubcommand, json: bool) -> anyhow::Result<()> {
    let config = config_or_default(root)?;
    let catalog = load_catalog(root, &config)?;

    match subcmd {
        CatalogSubcommand::Validate => {
            if json {
                print_json(&serde_json::json!({
                    "valid": true,
                    "version": catalog.version(),
                    "signals": catalog.len(),
                    "flag_groups": catalog.flag_groups().len(),
                }))?;
            } else {
                println!(
                    "Catalog is valid: {} signals, {} flag groups.",
                    catalog.len(),
                    catalog.flag_groups().len()
                );
            }
            Ok(())
        }

        CatalogSubcommand::Show { id: Some(id) } => {
            let signal = catalog
                .get(&id)
                .ok_or_else(|| anyhow::anyhow!("unknown signal '{id}'"))?;
            if json {
                return print_json(signal);
            }
            println!("id:      {}", signal.id);
            println!("type:    {}", signal.signal_type);
            if let Some(desc) = &signal.description {
                println!("about:   {desc}");
            }
            println!("default: {}", cell(&signal.default_value()));
            if signal.signal_type == SignalType::Enum {
                println!("values:");
                for v in &signal.values {
                    match &v.label {
                        Some(label) => println!("  {:<20} {label}", cell(&v.value)),
                        None => println!("  {}", cell(&v.value)),
                    }
                }
            }
            println!("derive:");
            let expr = serde_json::to_string_pretty(&signal.derive)?;
            for line in expr.lines() {
                println!("  {line}");
            }
            Ok(())
        }

        CatalogSubcommand::Show { id: None } => {
            if json {
                return print_json(&catalog.signals());
            }
            let rows: Vec<Vec<String>> = catalog
                .signals()
                .iter()
                .map(|s| {
                    let values = s
                        .values
                        .iter()
                        .map(|v| cell(&v.value))
                        .collect::<Vec<_>>()
                        .join(", ");
                    vec![
                        s.id.clone(),
                        s.signal_type.to_string(),
                        s.derive.kind().to_string(),
                        values,
                    ]
                })
                .collect();
            print_table(&["SIGNAL", "TYPE", "DERIVE", "VALUES"], &rows);
            Ok(())
        }

        CatalogSubcommand::Events => {
            let names = catalog.known_event_names();
            if json {
                return print_json(&names);
            }
            for name in names {
                println!("{name}");
            }
            Ok(())
        }
    }
}
