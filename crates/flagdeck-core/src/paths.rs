use crate::error::{FlagdeckError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// File constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "flagdeck.yaml";
pub const CATALOG_FILE: &str = "catalog.yaml";
pub const RULES_FILE: &str = "rules.yaml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Resolve a path from the config file relative to the project root.
pub fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

// ---------------------------------------------------------------------------
// Identifier validation
// ---------------------------------------------------------------------------

static ID_RE: OnceLock<Regex> = OnceLock::new();

fn id_re() -> &'static Regex {
    ID_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9_\-]*[a-z0-9]$|^[a-z0-9]$").expect("static regex")
    })
}

/// Signal and rule IDs: lowercase alphanumerics joined by `-` or `_`.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 64 || !id_re().is_match(id) {
        return Err(FlagdeckError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Derive an ID from a human title: "Hardpoints deployed!" → "hardpoints-deployed".
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug.truncate(64);
    slug.trim_end_matches('-').to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
