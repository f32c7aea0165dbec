//! CLI command implementations.

pub mod clear_queue;
pub mod logs;
pub mod purge;
pub mod queue;
pub mod resolve;
pub mod serve;
pub mod status;
pub mod sync;
pub mod token;

use anyhow::{bail, Result};
use serde::Serialize;

/// Output format of reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
}

impl Format {
    /// Parses `text` or `json`.
    pub fn parse(format: &str) -> Result<Self> {
        match format {
            "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            other => bail!("unknown output format: {other} (expected text or json)"),
        }
    }
}

/// Prints `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Formats an optional timestamp for text output.
pub fn or_never<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "never".to_string(), |v| v.to_string())
}
