//! Assembles a node from its configuration file.

use crate::config::NodeFile;
use anyhow::{Context, Result};
use edgesync_engine::{FileStateStore, Replica, SyncAdmin, SyncConfig, SyncOrchestrator};
use std::sync::Arc;
use tracing::debug;

/// Replica, orchestrator and configuration of one node.
pub struct Node {
    pub config: SyncConfig,
    pub replica: Arc<Replica>,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl Node {
    /// Builds the replica over the file state store and restores saved state.
    ///
    /// The state file stays locked until the node is dropped, so a second
    /// command against a running node fails instead of racing it.
    ///
    /// The orchestrator owns blocking HTTP clients, so this must run
    /// outside any async runtime.
    pub fn open(file: &NodeFile) -> Result<Self> {
        let config = file.sync_config()?;
        let registry = file.registry()?;
        let state_path = file.state_path();

        let store = FileStateStore::open(&state_path)
            .with_context(|| format!("opening state {}", state_path.display()))?;
        let replica = Replica::from_config(&config, registry).with_state_store(Arc::new(store));
        let restored = replica
            .load_state()
            .with_context(|| format!("loading state from {}", state_path.display()))?;
        debug!(path = %state_path.display(), restored, "node state opened");

        let replica = Arc::new(replica);
        let orchestrator = Arc::new(SyncOrchestrator::connect(replica.clone(), config.clone())?);
        Ok(Self {
            config,
            replica,
            orchestrator,
        })
    }

    /// Administrative surface over this node.
    pub fn admin(&self) -> SyncAdmin {
        SyncAdmin::new(self.replica.clone(), self.config.role)
            .with_orchestrator(self.orchestrator.clone())
    }
}
