use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Which loaded document a schema failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Document {
    Catalog,
    Rules,
    Config,
}

impl Document {
    pub fn as_str(self) -> &'static str {
        match self {
            Document::Catalog => "catalog",
            Document::Rules => "rules",
            Document::Config => "config",
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// FlagdeckError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FlagdeckError {
    #[error("not initialized: run 'flagdeck init'")]
    NotInitialized,

    #[error("malformed {document} document: {reason}")]
    MalformedSchema { document: Document, reason: String },

    #[error("signal '{signal}' uses combiner '{combiner}' but no such combiner is registered")]
    UnknownCombiner { signal: String, combiner: String },

    #[error("invalid id '{0}': must be lowercase alphanumeric with hyphens or underscores")]
    InvalidId(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FlagdeckError {
    pub fn catalog(reason: impl Into<String>) -> Self {
        FlagdeckError::MalformedSchema {
            document: Document::Catalog,
            reason: reason.into(),
        }
    }

    pub fn rules(reason: impl Into<String>) -> Self {
        FlagdeckError::MalformedSchema {
            document: Document::Rules,
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        FlagdeckError::MalformedSchema {
            document: Document::Config,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FlagdeckError>;
