pub mod catalog;
pub mod config;
pub mod derive;
pub mod engine;
pub mod error;
pub mod expr;
pub mod frame;
pub mod io;
pub mod matcher;
pub mod paths;
pub mod recency;
pub mod rules;
pub mod session;
pub mod types;
pub mod value;

pub use error::{FlagdeckError, Result};
