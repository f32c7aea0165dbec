//! Token command implementation.

use crate::config::NodeFile;
use anyhow::{Context, Result};
use edgesync_server::Authenticator;

/// Prints a signed token for `peer`, using the server section's secret.
pub fn run(file: &NodeFile, peer: &str) -> Result<()> {
    println!("{}", issue(file, peer)?);
    Ok(())
}

fn issue(file: &NodeFile, peer: &str) -> Result<String> {
    let auth = Authenticator::from_config(&file.server_config());
    let tokens = auth
        .tokens()
        .context("server.secret is not configured; signed tokens are disabled")?;
    Ok(tokens.create_token(peer)?)
}
