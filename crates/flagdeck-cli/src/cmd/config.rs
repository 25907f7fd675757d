use super::load_catalog;
use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use flagdeck_core::catalog::Catalog;
use flagdeck_core::config::{Config, WarnLevel};
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Validate the config against the catalog and the file system
    Validate,
}

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Validate => validate(root, json),
    }
}

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    // A missing catalog file is reported below; check windows against the
    // built-in catalog meanwhile.
    let catalog = match config.catalog_path(root) {
        Some(path) if !path.exists() => Catalog::builtin().context("failed to load built-in catalog")?,
        _ => load_catalog(root, &config)?,
    };
    let warnings = config.validate(root, &catalog);

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
