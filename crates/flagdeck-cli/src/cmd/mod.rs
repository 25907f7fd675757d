pub mod catalog;
pub mod config;
pub mod derive;
pub mod init;
pub mod replay;
pub mod rules;

use anyhow::Context;
use flagdeck_core::catalog::Catalog;
use flagdeck_core::config::Config;
use flagdeck_core::rules::RuleSet;
use flagdeck_core::FlagdeckError;
use std::path::Path;

/// The project config, or defaults when the project was never initialized.
/// Commands that only need the catalog work without `flagdeck init`.
pub fn config_or_default(root: &Path) -> anyhow::Result<Config> {
    match Config::load(root) {
        Ok(cfg) => Ok(cfg),
        Err(FlagdeckError::NotInitialized) => Ok(Config::default()),
        Err(e) => Err(e).context("failed to load flagdeck.yaml"),
    }
}

pub fn load_catalog(root: &Path, config: &Config) -> anyhow::Result<Catalog> {
    let source = config
        .catalog_path(root)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "built-in catalog".to_string());
    config
        .load_catalog(root)
        .with_context(|| format!("failed to load {source}"))
}

pub fn load_rules(root: &Path, config: &Config, catalog: &Catalog) -> anyhow::Result<RuleSet> {
    let path = config.rules_path(root);
    RuleSet::load(&path, catalog).with_context(|| format!("failed to load {}", path.display()))
}
