//! Administrative operations over the journal, checkpoints and audit log.
//!
//! Nothing here implements sync logic; it reads state and triggers the
//! operations exposed by [`Replica`] and [`SyncOrchestrator`].

use crate::audit::{AuditEntry, AuditOperation, AuditStatus};
use crate::config::NodeRole;
use crate::error::{SyncError, SyncResult};
use crate::orchestrator::{SyncOrchestrator, SyncState, SyncSummary};
use crate::record::LocalRecord;
use crate::replica::{Replica, Resolution};
use chrono::{DateTime, Utc};
use edgesync_protocol::{Operation, RecordId};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Default page size for queue and log listings.
pub const DEFAULT_LIMIT: usize = 50;

/// Sync state of one peer.
#[derive(Debug, Clone, Serialize)]
pub struct PeerStatus {
    /// Peer key.
    pub key: String,
    /// Pending journal entries on this peer's lane.
    pub pending: usize,
    /// Checkpoint time.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Checkpoint version.
    pub last_sync_version: u64,
    /// Current pass state, if the peer is attached to an orchestrator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SyncState>,
}

/// Node-wide sync status.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusReport {
    /// Whether change tracking is on.
    pub enabled: bool,
    /// Node role.
    pub role: NodeRole,
    /// Pending journal entries across all lanes.
    pub pending_changes: usize,
    /// Most recent checkpoint across peers.
    pub last_sync: Option<DateTime<Utc>>,
    /// Per-peer detail.
    pub peers: Vec<PeerStatus>,
}

/// One pending journal entry as shown to operators.
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    /// Journal entry id.
    pub id: u64,
    /// Peer lane.
    pub peer: String,
    /// Record type.
    pub record_type: String,
    /// Record identifier.
    pub record_id: RecordId,
    /// Kind of mutation.
    pub operation: Operation,
    /// Record version.
    pub version: u64,
    /// When the change was recorded.
    pub created_at: DateTime<Utc>,
    /// Failed delivery attempts.
    pub retry_count: u32,
    /// Last delivery error.
    pub last_error: Option<String>,
    /// Whether the entry crossed the retry threshold.
    pub escalated: bool,
}

/// Operator-facing view of a node.
pub struct SyncAdmin {
    replica: Arc<Replica>,
    orchestrator: Option<Arc<SyncOrchestrator>>,
    role: NodeRole,
}

impl SyncAdmin {
    /// Creates an admin surface without an orchestrator.
    pub fn new(replica: Arc<Replica>, role: NodeRole) -> Self {
        Self {
            replica,
            orchestrator: None,
            role,
        }
    }

    /// Attaches the orchestrator used by [`SyncAdmin::sync_now`].
    pub fn with_orchestrator(mut self, orchestrator: Arc<SyncOrchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// The replica.
    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    /// Node role.
    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Current status.
    pub fn status(&self) -> SyncStatusReport {
        let checkpoints = self.replica.checkpoints();
        let journal = self.replica.journal();

        let mut keys: Vec<String> = match &self.orchestrator {
            Some(orchestrator) => orchestrator.peer_keys(),
            None => self.replica.lanes().to_vec(),
        };
        for checkpoint in checkpoints.all() {
            if !keys.contains(&checkpoint.peer_key) {
                keys.push(checkpoint.peer_key);
            }
        }

        let peers = keys
            .into_iter()
            .map(|key| {
                let checkpoint = checkpoints.get(&key);
                PeerStatus {
                    pending: journal.pending_count_for(&key),
                    last_sync_time: checkpoint.as_ref().and_then(|c| c.last_sync_time),
                    last_sync_version: checkpoint.map_or(0, |c| c.last_sync_version),
                    state: self.orchestrator.as_ref().and_then(|o| o.state(&key)),
                    key,
                }
            })
            .collect();

        SyncStatusReport {
            enabled: self.replica.is_enabled(),
            role: self.role,
            pending_changes: journal.pending_count(),
            last_sync: checkpoints.latest(),
            peers,
        }
    }

    /// Pending journal entries, oldest first.
    pub fn queue(&self, limit: usize) -> Vec<QueueItem> {
        self.replica
            .journal()
            .pending(limit)
            .into_iter()
            .map(|entry| QueueItem {
                id: entry.id,
                peer: entry.peer_key,
                record_type: entry.change.record_type,
                record_id: entry.change.record_id,
                operation: entry.change.operation,
                version: entry.change.version,
                created_at: entry.change.created_at,
                retry_count: entry.retry_count,
                last_error: entry.last_error,
                escalated: entry.escalated,
            })
            .collect()
    }

    /// Audit entries, newest first.
    pub fn logs(&self, limit: usize) -> Vec<AuditEntry> {
        self.replica.audit().recent(limit)
    }

    /// Runs a pass against every peer.
    pub fn sync_now(&self) -> SyncSummary {
        let Some(orchestrator) = &self.orchestrator else {
            return SyncSummary::failed(SyncError::NoPeers.to_string());
        };
        self.record_admin("manual sync triggered", json!({}));
        orchestrator.sync_all()
    }

    /// Settles a record held in `conflict` status.
    pub fn resolve_conflict(
        &self,
        record_type: &str,
        record_id: impl Into<RecordId>,
        resolution: Resolution,
    ) -> SyncResult<LocalRecord> {
        self.replica.resolve_conflict(record_type, record_id, resolution)
    }

    /// Deletes every pending journal entry. Returns how many were removed.
    pub fn clear_queue(&self) -> SyncResult<usize> {
        let removed = self.replica.journal().clear_pending();
        info!(removed, "sync queue cleared");
        self.record_admin("sync queue cleared", json!({ "removed": removed }));
        self.replica.persist()?;
        Ok(removed)
    }

    /// Deletes processed entries confirmed before `before`.
    pub fn purge_processed(&self, before: DateTime<Utc>) -> SyncResult<usize> {
        let removed = self.replica.journal().purge_processed(before);
        info!(removed, before = %before, "processed journal entries purged");
        self.record_admin(
            "processed journal entries purged",
            json!({ "removed": removed, "before": before }),
        );
        self.replica.persist()?;
        Ok(removed)
    }

    fn record_admin(&self, message: &str, details: serde_json::Value) {
        self.replica.audit().append(
            AuditEntry::new(AuditOperation::Admin, AuditStatus::Success, message)
                .with_details(details),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PeerConfig, RetryConfig, SyncConfig};
    use crate::transport::MockTransport;
    use chrono::Duration;
    use edgesync_protocol::{FieldKind, Payload, RecordSchema, SchemaRegistry};

    fn setup() -> (Arc<Replica>, Arc<MockTransport>, SyncAdmin) {
        let peer = PeerConfig::new("cloud", "http://cloud");
        let config = SyncConfig::new(NodeRole::Local)
            .with_peer(peer.clone())
            .with_retry(RetryConfig::no_backoff());
        let registry = SchemaRegistry::new()
            .register(RecordSchema::new("inventory.product").field("name", FieldKind::Text));
        let replica = Arc::new(Replica::from_config(&config, registry));
        let transport = Arc::new(MockTransport::new());
        let orchestrator = Arc::new(
            SyncOrchestrator::new(replica.clone(), config).with_peer(peer, transport.clone()),
        );
        let admin = SyncAdmin::new(replica.clone(), NodeRole::Local).with_orchestrator(orchestrator);
        (replica, transport, admin)
    }

    fn create(replica: &Replica, id: &str) {
        let mut fields = Payload::new();
        fields.insert("name".into(), json!(id));
        replica.create("inventory.product", id, fields).unwrap();
    }

    #[test]
    fn status_and_queue() {
        let (replica, transport, admin) = setup();
        create(&replica, "1");
        create(&replica, "2");
        transport.fail_push("refused");
        admin.sync_now();

        let status = admin.status();
        assert!(status.enabled);
        assert_eq!(status.pending_changes, 2);
        assert!(status.last_sync.is_none());
        assert_eq!(status.peers[0].key, "cloud");
        assert_eq!(status.peers[0].state, Some(SyncState::Idle));

        let queue = admin.queue(1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].retry_count, 1);
        assert!(queue[0].last_error.is_some());
    }

    #[test]
    fn sync_now_then_purge() {
        let (replica, _transport, admin) = setup();
        create(&replica, "1");

        let summary = admin.sync_now();
        assert_eq!(summary.uploaded, 1);
        assert!(admin.status().last_sync.is_some());

        assert_eq!(admin.purge_processed(Utc::now() - Duration::hours(1)).unwrap(), 0);
        assert_eq!(admin.purge_processed(Utc::now() + Duration::seconds(1)).unwrap(), 1);
        assert!(replica.journal().is_empty());

        let logs = admin.logs(DEFAULT_LIMIT);
        assert_eq!(logs[0].operation, AuditOperation::Admin);
        assert!(logs.iter().any(|e| e.operation == AuditOperation::Sync));
    }

    #[test]
    fn clear_queue_is_audited() {
        let (replica, _transport, admin) = setup();
        create(&replica, "1");

        assert_eq!(admin.clear_queue().unwrap(), 1);
        assert_eq!(replica.journal().pending_count(), 0);
        let logs = admin.logs(1);
        assert_eq!(logs[0].message, "sync queue cleared");
        assert_eq!(logs[0].details["removed"], json!(1));
    }

    #[test]
    fn sync_now_without_orchestrator() {
        let replica = Arc::new(Replica::new(SchemaRegistry::new()));
        let admin = SyncAdmin::new(replica, NodeRole::Cloud);
        assert_eq!(admin.sync_now().errors, vec!["no peers configured".to_string()]);
        assert!(admin.status().peers.is_empty());
    }
}
