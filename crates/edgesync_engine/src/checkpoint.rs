//! Per-peer sync checkpoints.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Watermark of the last successful pass against one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    /// Peer key.
    pub peer_key: String,
    /// Lower bound for the next pull.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Highest version seen from this peer.
    pub last_sync_version: u64,
}

impl SyncCheckpoint {
    /// Creates an empty checkpoint.
    pub fn new(peer_key: impl Into<String>) -> Self {
        Self {
            peer_key: peer_key.into(),
            last_sync_time: None,
            last_sync_version: 0,
        }
    }
}

/// Checkpoints keyed by peer. At most one checkpoint per peer key.
#[derive(Default)]
pub struct CheckpointStore {
    checkpoints: RwLock<BTreeMap<String, SyncCheckpoint>>,
}

impl CheckpointStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the checkpoint of a peer.
    pub fn get(&self, peer_key: &str) -> Option<SyncCheckpoint> {
        self.checkpoints.read().get(peer_key).cloned()
    }

    /// Lower bound for the next pull from a peer.
    pub fn since(&self, peer_key: &str) -> Option<DateTime<Utc>> {
        self.checkpoints
            .read()
            .get(peer_key)
            .and_then(|c| c.last_sync_time)
    }

    /// Upserts the checkpoint after a successful pass.
    ///
    /// The version never moves backwards.
    pub fn advance(&self, peer_key: &str, time: DateTime<Utc>, version: u64) -> SyncCheckpoint {
        let mut checkpoints = self.checkpoints.write();
        let checkpoint = checkpoints
            .entry(peer_key.to_string())
            .or_insert_with(|| SyncCheckpoint::new(peer_key));
        checkpoint.last_sync_time = Some(time);
        checkpoint.last_sync_version = checkpoint.last_sync_version.max(version);
        checkpoint.clone()
    }

    /// Most recent sync time across all peers.
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.checkpoints
            .read()
            .values()
            .filter_map(|c| c.last_sync_time)
            .max()
    }

    /// All checkpoints, ordered by peer key.
    pub fn all(&self) -> Vec<SyncCheckpoint> {
        self.checkpoints.read().values().cloned().collect()
    }

    /// Replaces the contents.
    pub fn restore(&self, checkpoints: Vec<SyncCheckpoint>) {
        *self.checkpoints.write() = checkpoints
            .into_iter()
            .map(|c| (c.peer_key.clone(), c))
            .collect();
    }
}
