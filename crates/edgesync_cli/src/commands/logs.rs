//! Logs command implementation.

use super::{print_json, Format};
use crate::config::NodeFile;
use crate::node::Node;
use anyhow::Result;
use serde_json::json;

/// Runs the logs command.
pub fn run(file: &NodeFile, limit: usize, format: &str) -> Result<()> {
    let format = Format::parse(format)?;
    let node = Node::open(file)?;
    let entries = node.admin().logs(limit);

    if format == Format::Json {
        return print_json(&json!({ "logs": entries }));
    }

    for entry in &entries {
        let subject = match (&entry.record_type, &entry.record_id) {
            (Some(record_type), Some(record_id)) => format!(" {record_type}/{record_id}"),
            _ => String::new(),
        };
        println!(
            "{} {:?}/{:?}{} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.operation,
            entry.status,
            subject,
            entry.message
        );
    }
    Ok(())
}
