//! Serve command implementation.

use crate::config::NodeFile;
use crate::node::Node;
use anyhow::{Context, Result};
use edgesync_engine::SyncScheduler;
use edgesync_server::SyncServer;
use std::sync::Arc;
use tracing::{info, warn};

/// Serves the sync API until Ctrl-C, running scheduled passes when an
/// interval is configured.
pub fn run(file: &NodeFile) -> Result<()> {
    // Blocking HTTP clients must be created and dropped outside the runtime;
    // `node` and `server` outlive it.
    let node = Node::open(file)?;
    let server = Arc::new(SyncServer::new(node.admin(), file.server_config()));

    let scheduler = node
        .config
        .sync_interval
        .map(|interval| SyncScheduler::new(node.orchestrator.clone(), interval).start());
    if scheduler.is_none() {
        info!("no sync interval configured, passes run on demand only");
    }

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    let result = runtime.block_on(edgesync_server::serve(server.clone(), shutdown_signal()));
    drop(runtime);

    if let Some(scheduler) = scheduler {
        scheduler.stop();
    }
    if let Err(e) = node.replica.persist() {
        warn!(error = %e, "failed to persist state on shutdown");
    }
    result?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
