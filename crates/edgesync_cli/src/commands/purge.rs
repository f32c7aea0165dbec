//! Purge command implementation.

use crate::config::NodeFile;
use crate::node::Node;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};

/// Deletes processed journal entries confirmed before the cutoff.
pub fn run(file: &NodeFile, before: Option<&str>, older_than_days: Option<u32>) -> Result<()> {
    let cutoff = cutoff(before, older_than_days, Utc::now())?;
    let node = Node::open(file)?;
    let removed = node.admin().purge_processed(cutoff)?;
    println!("Purged {removed} processed journal entries before {cutoff}");
    Ok(())
}

fn cutoff(
    before: Option<&str>,
    older_than_days: Option<u32>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    match (before, older_than_days) {
        (Some(before), _) => Ok(DateTime::parse_from_rfc3339(before)
            .with_context(|| format!("invalid timestamp: {before}"))?
            .with_timezone(&Utc)),
        (None, Some(days)) => Ok(now - Duration::days(i64::from(days))),
        (None, None) => bail!("either --before or --older-than-days is required"),
    }
}
