//! Clear-queue command implementation.

use crate::config::NodeFile;
use crate::node::Node;
use anyhow::{bail, Result};

/// Drops every pending journal entry.
pub fn run(file: &NodeFile, confirmed: bool) -> Result<()> {
    if !confirmed {
        bail!("clear-queue discards unsent changes; pass --yes to confirm");
    }
    let node = Node::open(file)?;
    let removed = node.admin().clear_queue()?;
    println!("Removed {removed} pending journal entries");
    Ok(())
}
