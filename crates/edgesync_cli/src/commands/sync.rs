//! Sync command implementation.

use super::{print_json, Format};
use crate::config::NodeFile;
use crate::node::Node;
use anyhow::{bail, Result};

/// Runs one pass against `peer`, or against every peer.
///
/// Fails when the pass reported errors, after printing the summary.
pub fn run(file: &NodeFile, peer: Option<&str>, format: &str) -> Result<()> {
    let format = Format::parse(format)?;
    let node = Node::open(file)?;
    let summary = match peer {
        Some(peer) => node.orchestrator.sync_peer(peer),
        None => node.admin().sync_now(),
    };

    if format == Format::Json {
        print_json(&summary)?;
    } else {
        println!("Uploaded:   {}", summary.uploaded);
        println!("Downloaded: {}", summary.downloaded);
        println!("Ignored:    {}", summary.ignored);
        println!("Conflicts:  {}", summary.conflicts);
        for error in &summary.errors {
            println!("Error:      {error}");
        }
    }

    if !summary.is_clean() {
        bail!("sync finished with {} error(s)", summary.errors.len());
    }
    Ok(())
}
