//! Queue command implementation.

use super::{print_json, Format};
use crate::config::NodeFile;
use crate::node::Node;
use anyhow::Result;
use serde_json::json;

/// Runs the queue command.
pub fn run(file: &NodeFile, limit: usize, format: &str) -> Result<()> {
    let format = Format::parse(format)?;
    let node = Node::open(file)?;
    let items = node.admin().queue(limit);

    if format == Format::Json {
        return print_json(&json!({ "queue": items }));
    }

    if items.is_empty() {
        println!("Journal is empty");
        return Ok(());
    }
    for item in &items {
        let flag = if item.escalated { " [escalated]" } else { "" };
        println!(
            "#{:<6} {:<12} {:<7} {}/{} v{} retries={}{}",
            item.id,
            item.peer,
            item.operation,
            item.record_type,
            item.record_id,
            item.version,
            item.retry_count,
            flag
        );
        if let Some(error) = &item.last_error {
            println!("        last error: {error}");
        }
    }
    Ok(())
}
