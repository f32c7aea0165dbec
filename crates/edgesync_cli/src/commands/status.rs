//! Status command implementation.

use super::{or_never, print_json, Format};
use crate::config::NodeFile;
use crate::node::Node;
use anyhow::Result;

/// Runs the status command.
pub fn run(file: &NodeFile, format: &str) -> Result<()> {
    let format = Format::parse(format)?;
    let node = Node::open(file)?;
    let status = node.admin().status();

    if format == Format::Json {
        return print_json(&status);
    }

    println!("Role:            {}", status.role);
    println!("Sync enabled:    {}", status.enabled);
    println!("Pending changes: {}", status.pending_changes);
    println!("Last sync:       {}", or_never(status.last_sync));
    if status.peers.is_empty() {
        println!("No peers configured");
        return Ok(());
    }
    println!();
    println!("{:<20} {:>8} {:>10}  LAST SYNC", "PEER", "PENDING", "VERSION");
    for peer in &status.peers {
        println!(
            "{:<20} {:>8} {:>10}  {}",
            peer.key,
            peer.pending,
            peer.last_sync_version,
            or_never(peer.last_sync_time)
        );
    }
    Ok(())
}
