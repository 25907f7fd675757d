use crate::catalog::Catalog;
use crate::error::{FlagdeckError, Result};
use crate::paths;
use crate::recency::DEFAULT_WINDOW_SECONDS;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Catalog document. The built-in catalog is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<PathBuf>,
    #[serde(default = "default_rules")]
    pub rules: PathBuf,
    /// How long a discrete event stays in the recency index.
    #[serde(default = "default_window")]
    pub recency_window_seconds: u64,
    /// Actor used for frames that do not name one.
    #[serde(default = "default_actor")]
    pub default_actor: String,
}

fn default_version() -> u32 {
    1
}

fn default_rules() -> PathBuf {
    PathBuf::from(paths::RULES_FILE)
}

fn default_window() -> u64 {
    DEFAULT_WINDOW_SECONDS
}

fn default_actor() -> String {
    "default".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            catalog: None,
            rules: default_rules(),
            recency_window_seconds: default_window(),
            default_actor: default_actor(),
        }
    }
}

impl Config {
    /// The layout `flagdeck init` writes: a local copy of the catalog next
    /// to the rules.
    pub fn scaffold() -> Self {
        Self {
            catalog: Some(PathBuf::from(paths::CATALOG_FILE)),
            ..Self::default()
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(FlagdeckError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn catalog_path(&self, root: &Path) -> Option<PathBuf> {
        self.catalog.as_deref().map(|p| paths::resolve(root, p))
    }

    pub fn rules_path(&self, root: &Path) -> PathBuf {
        paths::resolve(root, &self.rules)
    }

    /// The recency window as a duration. Fails when the configured seconds
    /// do not fit a `TimeDelta`.
    pub fn recency_window(&self) -> Result<TimeDelta> {
        i64::try_from(self.recency_window_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .ok_or_else(|| {
                FlagdeckError::config(format!(
                    "recency_window_seconds {} is out of range",
                    self.recency_window_seconds
                ))
            })
    }

    /// The configured catalog, or the built-in one.
    pub fn load_catalog(&self, root: &Path) -> Result<Catalog> {
        match self.catalog_path(root) {
            Some(path) => Catalog::load(&path),
            None => Catalog::builtin(),
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self, root: &Path, catalog: &Catalog) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.recency_window_seconds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "recency_window_seconds is 0: no discrete event would ever be recent"
                    .to_string(),
            });
        } else if let Err(e) = self.recency_window() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: e.to_string(),
            });
        }

        // A recent() bound longer than the window can never see the older part.
        let window = self.recency_window_seconds as f64;
        for signal in catalog.signals() {
            signal.derive.walk(&mut |expr| {
                if let crate::expr::Derivation::Recent {
                    event,
                    within_seconds,
                } = expr
                {
                    if *within_seconds > window {
                        warnings.push(ConfigWarning {
                            level: WarnLevel::Warning,
                            message: format!(
                                "signal '{}' checks '{}' within {}s but events are pruned after {}s",
                                signal.id, event, within_seconds, self.recency_window_seconds
                            ),
                        });
                    }
                }
            });
        }

        if let Some(path) = self.catalog_path(root) {
            if !path.exists() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("catalog file '{}' does not exist", path.display()),
                });
            }
        }

        let rules = self.rules_path(root);
        if !rules.exists() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("rules file '{}' does not exist", rules.display()),
            });
        }

        if self.default_actor.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "default_actor is empty; frames without an actor share one history"
                    .to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
