//! Resolve command implementation.

use crate::config::NodeFile;
use crate::node::Node;
use anyhow::{bail, Context, Result};
use edgesync_engine::Resolution;
use edgesync_protocol::Payload;

/// Settles a record held in conflict.
pub fn run(
    file: &NodeFile,
    record_type: &str,
    record_id: &str,
    resolution: &str,
    data: Option<&str>,
) -> Result<()> {
    let resolution = parse_resolution(resolution, data)?;
    let node = Node::open(file)?;
    let record = node
        .admin()
        .resolve_conflict(record_type, record_id, resolution)?;
    println!(
        "{}/{} is now {} at version {}",
        record.record_type, record.record_id, record.sync_status, record.sync_version
    );
    Ok(())
}

fn parse_resolution(resolution: &str, data: Option<&str>) -> Result<Resolution> {
    match (resolution, data) {
        ("local", None) => Ok(Resolution::Local),
        ("remote", None) => Ok(Resolution::Remote),
        ("merge", Some(data)) => {
            let payload: Payload =
                serde_json::from_str(data).context("merge data must be a JSON object")?;
            Ok(Resolution::Merge(payload))
        }
        ("merge", None) => bail!("merge requires --data"),
        ("local" | "remote", Some(_)) => bail!("--data is only used with merge"),
        (other, _) => bail!("unknown resolution: {other} (expected local, remote or merge)"),
    }
}
