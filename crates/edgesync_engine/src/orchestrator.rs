//! Sync orchestrator.
//!
//! One pass against a peer runs `Idle → Uploading → Downloading →
//! Finalizing → Idle`. Passes are serialized per peer with a non-blocking
//! lock; a pass that cannot take the lock reports "already syncing".
//! Passes against different peers are independent: one peer's failure never
//! aborts another's, and each peer has its own checkpoint.
//!
//! Errors never escape a pass. They are collected into the [`SyncSummary`]
//! and written to the audit log.

use crate::audit::{AuditEntry, AuditOperation, AuditStatus};
use crate::config::{PeerConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::replica::{ApplyOutcome, Replica};
use crate::transport::PeerTransport;
use chrono::{DateTime, Utc};
use edgesync_protocol::ChangeRecord;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

/// Where a peer's pass currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// No pass running.
    Idle,
    /// Pushing journal entries.
    Uploading,
    /// Pulling and applying the peer's changes.
    Downloading,
    /// Advancing the checkpoint and writing the audit entry.
    Finalizing,
}

impl SyncState {
    /// Returns true while a pass is running.
    pub fn is_active(&self) -> bool {
        !matches!(self, SyncState::Idle)
    }
}

/// Outcome of one or more passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Changes the peer accepted.
    pub uploaded: u64,
    /// Incoming changes applied locally.
    pub downloaded: u64,
    /// Incoming changes that were already applied, stale, or held.
    pub ignored: u64,
    /// Conflicts reported by the peer or detected locally.
    pub conflicts: u64,
    /// Error messages.
    pub errors: Vec<String>,
}

impl SyncSummary {
    /// A summary carrying a single error.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            ..Default::default()
        }
    }

    /// Adds another summary's counts and errors.
    pub fn merge(&mut self, other: SyncSummary) {
        self.uploaded += other.uploaded;
        self.downloaded += other.downloaded;
        self.ignored += other.ignored;
        self.conflicts += other.conflicts;
        self.errors.extend(other.errors);
    }

    /// Returns true if no errors were recorded.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Counters across passes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    /// Passes that finished without a fatal error.
    pub passes_completed: u64,
    /// Passes aborted by a fatal error.
    pub passes_failed: u64,
    /// Changes accepted by peers.
    pub changes_uploaded: u64,
    /// Incoming changes applied.
    pub changes_downloaded: u64,
    /// Conflicts encountered.
    pub conflicts_encountered: u64,
    /// End of the last completed pass.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Last fatal error message.
    pub last_error: Option<String>,
}

struct Peer {
    config: PeerConfig,
    transport: Box<dyn PeerTransport>,
    lock: Mutex<()>,
    state: RwLock<SyncState>,
}

/// Drives sync passes for every configured peer.
pub struct SyncOrchestrator {
    replica: Arc<Replica>,
    config: SyncConfig,
    peers: Vec<Peer>,
    stats: RwLock<SyncStats>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator with no peers attached.
    pub fn new(replica: Arc<Replica>, config: SyncConfig) -> Self {
        Self {
            replica,
            config,
            peers: Vec::new(),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Attaches a peer with its transport.
    pub fn with_peer(mut self, peer: PeerConfig, transport: impl PeerTransport + 'static) -> Self {
        self.peers.push(Peer {
            config: peer,
            transport: Box::new(transport),
            lock: Mutex::new(()),
            state: RwLock::new(SyncState::Idle),
        });
        self
    }

    /// Creates an orchestrator with an HTTP transport for every configured peer.
    #[cfg(feature = "reqwest")]
    pub fn connect(replica: Arc<Replica>, config: SyncConfig) -> SyncResult<Self> {
        use crate::http::{HttpTransport, ReqwestClient};

        config.validate()?;
        let client = ReqwestClient::new(config.timeout)?;
        let peers = config.peers.clone();
        let mut orchestrator = Self::new(replica, config);
        for peer in peers {
            let transport = HttpTransport::from_peer(&peer, client.clone());
            orchestrator = orchestrator.with_peer(peer, transport);
        }
        Ok(orchestrator)
    }

    /// The replica this orchestrator syncs.
    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Keys of the attached peers.
    pub fn peer_keys(&self) -> Vec<String> {
        self.peers.iter().map(|p| p.config.key.clone()).collect()
    }

    /// Current state of a peer's pass.
    pub fn state(&self, peer_key: &str) -> Option<SyncState> {
        self.peer(peer_key).map(|p| *p.state.read())
    }

    /// Counters across passes.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Runs one pass against every peer and merges the summaries.
    ///
    /// Peers are synced concurrently, each under its own lock.
    pub fn sync_all(&self) -> SyncSummary {
        if !self.config.enabled {
            return SyncSummary::failed(SyncError::SyncDisabled.to_string());
        }
        if self.peers.is_empty() {
            return SyncSummary::failed(SyncError::NoPeers.to_string());
        }

        let summaries: Vec<SyncSummary> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .peers
                .iter()
                .map(|peer| scope.spawn(move || self.sync_peer(&peer.config.key)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| SyncSummary::failed("sync pass panicked"))
                })
                .collect()
        });

        let mut total = SyncSummary::default();
        for summary in summaries {
            total.merge(summary);
        }
        total
    }

    /// Runs one pass against a peer.
    pub fn sync_peer(&self, peer_key: &str) -> SyncSummary {
        if !self.config.enabled {
            return SyncSummary::failed(SyncError::SyncDisabled.to_string());
        }
        let Some(peer) = self.peer(peer_key) else {
            return SyncSummary::failed(SyncError::UnknownPeer(peer_key.to_string()).to_string());
        };
        let Some(_pass_guard) = peer.lock.try_lock() else {
            warn!(peer = peer_key, "sync pass skipped, peer is busy");
            return SyncSummary::failed(SyncError::AlreadySyncing(peer_key.to_string()).to_string());
        };

        let pass_id = Uuid::new_v4();
        let span = info_span!("sync_pass", peer = peer_key, pass_id = %pass_id);
        let _enter = span.enter();
        let started = Instant::now();
        info!("sync pass started");

        let mut summary = SyncSummary::default();
        let outcome = self.run_pass(peer, &mut summary);
        self.finalize(peer, pass_id, outcome, &mut summary);

        info!(
            uploaded = summary.uploaded,
            downloaded = summary.downloaded,
            conflicts = summary.conflicts,
            errors = summary.errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sync pass finished"
        );
        summary
    }

    fn peer(&self, peer_key: &str) -> Option<&Peer> {
        self.peers.iter().find(|p| p.config.key == peer_key)
    }

    fn set_state(peer: &Peer, state: SyncState) {
        *peer.state.write() = state;
    }

    fn run_pass(&self, peer: &Peer, summary: &mut SyncSummary) -> SyncResult<(DateTime<Utc>, u64)> {
        Self::set_state(peer, SyncState::Uploading);
        self.upload(peer, summary)?;
        Self::set_state(peer, SyncState::Downloading);
        self.download(peer, summary)
    }

    /// True once the head of the lane has waited out its backoff.
    fn lane_ready(&self, peer_key: &str) -> bool {
        let Some(head) = self.replica.journal().dequeue_batch(peer_key, 1).pop() else {
            return true;
        };
        let Some(last_attempt) = head.last_attempt_at else {
            return true;
        };
        let delay = self.config.retry.delay_for_attempt(head.retry_count);
        chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| last_attempt.checked_add_signed(d))
            .is_some_and(|ready_at| ready_at <= Utc::now())
    }

    fn upload(&self, peer: &Peer, summary: &mut SyncSummary) -> SyncResult<()> {
        let key = peer.config.key.as_str();
        let journal = self.replica.journal();

        if !self.lane_ready(key) {
            info!(pending = journal.pending_count_for(key), "upload deferred by backoff");
            return Ok(());
        }

        loop {
            let batch = journal.dequeue_batch(key, self.config.push_batch_size);
            if batch.is_empty() {
                return Ok(());
            }
            let changes: Vec<ChangeRecord> = batch.iter().map(|e| e.change.clone()).collect();

            match peer.transport.push(&changes) {
                Ok(receipt) => {
                    for entry in &batch {
                        journal.mark_processed(entry.id)?;
                    }
                    debug!(
                        batch = batch.len(),
                        accepted = receipt.accepted_count,
                        conflicts = receipt.conflict_count,
                        "batch uploaded"
                    );
                    summary.uploaded += receipt.accepted_count;
                    summary.conflicts += receipt.conflict_count;
                    summary.errors.extend(receipt.errors);
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(batch = batch.len(), error = %message, "batch upload failed");
                    for entry in &batch {
                        let failures = journal.mark_failed(entry.id, &message)?;
                        if self.config.retry.should_escalate(failures) && journal.mark_escalated(entry.id)? {
                            self.escalate(key, entry.id, &entry.change, failures, &message);
                        }
                    }
                    return Err(e);
                }
            }
        }
    }

    fn escalate(&self, peer_key: &str, entry_id: u64, change: &ChangeRecord, failures: u32, error: &str) {
        warn!(
            entry_id,
            record_type = %change.record_type,
            record_id = %change.record_id,
            retry_count = failures,
            "journal entry escalated"
        );
        self.replica.audit().append(
            AuditEntry::new(
                AuditOperation::Escalation,
                AuditStatus::Error,
                format!("delivery to {peer_key} failed {failures} times"),
            )
            .with_subject(change.record_type.clone(), change.record_id.clone())
            .with_details(json!({
                "peer": peer_key,
                "entry_id": entry_id,
                "version": change.version,
                "retry_count": failures,
                "last_error": error,
            })),
        );
    }

    fn download(&self, peer: &Peer, summary: &mut SyncSummary) -> SyncResult<(DateTime<Utc>, u64)> {
        let key = peer.config.key.as_str();
        let since = self.replica.checkpoints().since(key);
        let requested_at = Utc::now();
        let batch = peer.transport.pull(since)?;
        let watermark = batch.high_water_mark.unwrap_or(requested_at);
        debug!(changes = batch.changes.len(), since = ?since, "changes pulled");

        let mut max_version = 0;
        for change in &batch.changes {
            max_version = max_version.max(change.version);
            match self.replica.apply_incoming(change, self.config.conflict_policy) {
                Ok(ApplyOutcome::Applied) => summary.downloaded += 1,
                Ok(ApplyOutcome::Ignored) | Ok(ApplyOutcome::Held) => summary.ignored += 1,
                Ok(ApplyOutcome::Conflict(_)) => summary.conflicts += 1,
                Err(e) => {
                    warn!(
                        record_type = %change.record_type,
                        record_id = %change.record_id,
                        version = change.version,
                        error = %e,
                        "failed to apply incoming change"
                    );
                    summary.errors.push(format!(
                        "{}/{} v{}: {e}",
                        change.record_type, change.record_id, change.version
                    ));
                }
            }
        }

        if !batch.rejected.is_empty() {
            for message in &batch.rejected {
                warn!(peer = %key, error = %message, "incoming change could not be decoded");
                summary.errors.push(format!("rejected incoming change {message}"));
            }
            self.replica.audit().append(
                AuditEntry::new(
                    AuditOperation::Download,
                    AuditStatus::Partial,
                    format!("{} changes from {key} could not be decoded", batch.rejected.len()),
                )
                .with_details(json!({ "peer": key, "rejected": batch.rejected })),
            );
        }
        Ok((watermark, max_version))
    }

    fn finalize(
        &self,
        peer: &Peer,
        pass_id: Uuid,
        outcome: SyncResult<(DateTime<Utc>, u64)>,
        summary: &mut SyncSummary,
    ) {
        Self::set_state(peer, SyncState::Finalizing);
        let key = peer.config.key.as_str();

        match outcome {
            Ok((watermark, version)) => {
                let checkpoint = self.replica.checkpoints().advance(key, watermark, version);
                let status = if summary.is_clean() {
                    AuditStatus::Success
                } else {
                    AuditStatus::Partial
                };
                self.replica.audit().append(
                    AuditEntry::new(AuditOperation::Sync, status, format!("sync with {key} completed"))
                        .with_details(json!({
                            "peer": key,
                            "pass_id": pass_id.to_string(),
                            "summary": &*summary,
                            "checkpoint": checkpoint,
                        })),
                );

                let mut stats = self.stats.write();
                stats.passes_completed += 1;
                stats.changes_uploaded += summary.uploaded;
                stats.changes_downloaded += summary.downloaded;
                stats.conflicts_encountered += summary.conflicts;
                stats.last_sync_time = Some(Utc::now());
            }
            Err(e) => {
                error!(error = %e, retryable = e.is_retryable(), "sync pass aborted");
                summary.errors.push(e.to_string());
                self.replica.audit().append(
                    AuditEntry::new(
                        AuditOperation::Error,
                        AuditStatus::Error,
                        format!("sync with {key} failed: {e}"),
                    )
                    .with_details(json!({
                        "peer": key,
                        "pass_id": pass_id.to_string(),
                        "retryable": e.is_retryable(),
                        "summary": &*summary,
                    })),
                );

                let mut stats = self.stats.write();
                stats.passes_failed += 1;
                stats.changes_uploaded += summary.uploaded;
                stats.last_error = Some(e.to_string());
            }
        }

        if let Err(e) = self.replica.persist() {
            error!(error = %e, "failed to persist sync state");
            summary.errors.push(format!("failed to persist sync state: {e}"));
        }
        Self::set_state(peer, SyncState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NodeRole, RetryConfig};
    use crate::record::SyncStatus;
    use crate::transport::{MockTransport, PullBatch, PushReceipt};
    use chrono::Duration;
    use edgesync_protocol::{
        ConflictPolicy, FieldKind, Operation, Payload, RecordId, RecordSchema, SchemaRegistry,
    };
    use serde_json::Value;

    const PRODUCT: &str = "inventory.product";

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new().register(
            RecordSchema::new(PRODUCT)
                .field("name", FieldKind::Text)
                .field("qty", FieldKind::Integer),
        )
    }

    fn config(peers: &[&str]) -> SyncConfig {
        let mut config = SyncConfig::new(NodeRole::Local).with_retry(RetryConfig::no_backoff());
        for peer in peers {
            config = config.with_peer(PeerConfig::new(*peer, format!("http://{peer}")));
        }
        config
    }

    fn setup(config: SyncConfig) -> (Arc<Replica>, Arc<MockTransport>, SyncOrchestrator) {
        let replica = Arc::new(Replica::from_config(&config, registry()));
        let transport = Arc::new(MockTransport::new());
        let peer = config.peers[0].clone();
        let orchestrator =
            SyncOrchestrator::new(replica.clone(), config).with_peer(peer, transport.clone());
        (replica, transport, orchestrator)
    }

    fn fields(value: Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    fn create(replica: &Replica, id: &str) {
        replica
            .create(PRODUCT, id, fields(json!({"name": id, "qty": 1})))
            .unwrap();
    }

    fn remote(id: &str, version: u64, data: Value) -> ChangeRecord {
        ChangeRecord::new(PRODUCT, id, Operation::Update, fields(data), version).unwrap()
    }

    fn pushed_ids(transport: &MockTransport, call: usize) -> Vec<String> {
        transport.pushed_batches()[call]
            .iter()
            .map(|c| c.record_id.to_string())
            .collect()
    }

    #[test]
    fn pass_uploads_downloads_and_advances_checkpoint() {
        let (replica, transport, orchestrator) = setup(config(&["cloud"]));
        create(&replica, "a");
        transport.set_pull_response(Ok(PullBatch {
            changes: vec![remote("b", 1, json!({"name": "b"}))],
            ..Default::default()
        }));

        let before = Utc::now();
        let summary = orchestrator.sync_peer("cloud");

        assert!(summary.is_clean(), "{:?}", summary.errors);
        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.downloaded, 1);
        assert_eq!(replica.journal().pending_count(), 0);

        let checkpoint = replica.checkpoints().get("cloud").unwrap();
        assert!(checkpoint.last_sync_time.unwrap() >= before);
        assert_eq!(checkpoint.last_sync_version, 1);
        assert_eq!(replica.audit().by_operation(AuditOperation::Sync).len(), 1);
        assert_eq!(orchestrator.state("cloud"), Some(SyncState::Idle));
        assert_eq!(orchestrator.stats().passes_completed, 1);
    }

    #[test]
    fn batches_respect_size_and_order() {
        let (replica, transport, orchestrator) = setup(config(&["cloud"]).with_push_batch_size(2));
        for id in ["1", "2", "3", "4", "5"] {
            create(&replica, id);
        }

        let summary = orchestrator.sync_peer("cloud");

        assert_eq!(summary.uploaded, 5);
        assert_eq!(transport.pushed_batches().len(), 3);
        assert_eq!(pushed_ids(&transport, 0), vec!["1", "2"]);
        assert_eq!(pushed_ids(&transport, 2), vec!["5"]);
    }

    #[test]
    fn failed_push_is_retried_in_order_next_pass() {
        let (replica, transport, orchestrator) = setup(config(&["cloud"]));
        create(&replica, "1");
        create(&replica, "2");
        transport.fail_push("connection refused");

        let summary = orchestrator.sync_peer("cloud");
        assert_eq!(summary.uploaded, 0);
        assert!(summary.errors[0].contains("connection refused"));
        for entry in replica.journal().pending(10) {
            assert_eq!(entry.retry_count, 1);
            assert!(entry.processed_at.is_none());
            assert!(entry.last_error.as_deref().unwrap_or("").contains("connection refused"));
        }
        assert!(replica.checkpoints().get("cloud").is_none());
        assert!(transport.pull_requests().is_empty());
        assert_eq!(replica.audit().by_operation(AuditOperation::Error).len(), 1);

        create(&replica, "3");
        transport.recover();
        let summary = orchestrator.sync_peer("cloud");

        assert_eq!(summary.uploaded, 3);
        assert_eq!(pushed_ids(&transport, 0), vec!["1", "2", "3"]);
        assert!(replica.checkpoints().get("cloud").is_some());
    }

    #[test]
    fn failed_pull_keeps_checkpoint() {
        let (_replica, transport, orchestrator) = setup(config(&["cloud"]));
        let hwm = Utc::now() - Duration::minutes(10);
        transport.set_pull_response(Ok(PullBatch {
            high_water_mark: Some(hwm),
            ..Default::default()
        }));
        orchestrator.sync_peer("cloud");

        transport.fail_pull("timed out");
        let summary = orchestrator.sync_peer("cloud");
        assert!(!summary.is_clean());

        transport.recover();
        orchestrator.sync_peer("cloud");

        assert_eq!(transport.pull_requests(), vec![None, Some(hwm), Some(hwm)]);
    }

    #[test]
    fn apply_errors_are_isolated() {
        let (replica, transport, orchestrator) = setup(config(&["cloud"]));
        let unknown =
            ChangeRecord::new("sales.order", "9", Operation::Create, Payload::new(), 1).unwrap();
        transport.set_pull_response(Ok(PullBatch {
            changes: vec![unknown, remote("1", 1, json!({"name": "x"}))],
            ..Default::default()
        }));

        let summary = orchestrator.sync_peer("cloud");

        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("sales.order"));
        assert!(replica.checkpoints().get("cloud").is_some());
        let audit = replica.audit().by_operation(AuditOperation::Sync);
        assert_eq!(audit[0].status, AuditStatus::Partial);
    }

    #[test]
    fn undecodable_pulled_entries_do_not_stall_the_peer() {
        let (replica, transport, orchestrator) = setup(config(&["cloud"]));
        let hwm = Utc::now() - Duration::minutes(1);
        transport.set_pull_response(Ok(PullBatch {
            changes: vec![remote("1", 1, json!({"name": "good"}))],
            rejected: vec!["inventory.product/2: invalid version 0: versions are positive".into()],
            high_water_mark: Some(hwm),
        }));

        let summary = orchestrator.sync_peer("cloud");

        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("inventory.product/2"));
        assert!(replica.get(PRODUCT, &RecordId::new("1")).unwrap().is_some());
        assert_eq!(
            replica.checkpoints().get("cloud").unwrap().last_sync_time,
            Some(hwm)
        );
        let pulled = replica.audit().by_operation(AuditOperation::Download);
        assert_eq!(pulled.len(), 1);
        assert_eq!(pulled[0].status, AuditStatus::Partial);

        orchestrator.sync_peer("cloud");
        assert_eq!(transport.pull_requests(), vec![None, Some(hwm)]);
    }

    #[test]
    fn remote_receipt_counts_are_reported() {
        let (replica, transport, orchestrator) = setup(config(&["cloud"]));
        create(&replica, "1");
        create(&replica, "2");
        transport.set_push_response(Ok(PushReceipt {
            accepted_count: 1,
            conflict_count: 1,
            errors: vec!["inventory.product/2: rejected".into()],
        }));

        let summary = orchestrator.sync_peer("cloud");

        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.conflicts, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(replica.journal().pending_count(), 0);
    }

    #[test]
    fn concurrent_pass_reports_already_syncing() {
        let (_replica, transport, orchestrator) = setup(config(&["cloud"]));
        let peer = orchestrator.peer("cloud").unwrap();
        let _held = peer.lock.lock();

        let summary = orchestrator.sync_peer("cloud");

        assert_eq!(summary.errors, vec!["peer cloud is already syncing".to_string()]);
        assert!(transport.pull_requests().is_empty());
    }

    #[test]
    fn disabled_and_unknown_peers() {
        let (_replica, _transport, orchestrator) = setup(config(&["cloud"]).with_enabled(false));
        assert_eq!(orchestrator.sync_all().errors, vec!["sync is not enabled".to_string()]);

        let (_replica, _transport, orchestrator) = setup(config(&["cloud"]));
        assert!(orchestrator.sync_peer("other").errors[0].contains("unknown peer"));
    }

    #[test]
    fn backoff_defers_upload_but_not_download() {
        let config = config(&["cloud"]).with_retry(RetryConfig::new());
        let (replica, transport, orchestrator) = setup(config);
        create(&replica, "1");
        transport.fail_push("refused");
        orchestrator.sync_peer("cloud");

        transport.recover();
        let summary = orchestrator.sync_peer("cloud");

        assert!(summary.is_clean());
        assert_eq!(transport.pushed_batches().len(), 0);
        assert_eq!(transport.pull_requests().len(), 1);
        assert_eq!(replica.journal().pending_count(), 1);
    }

    #[test]
    fn escalation_is_audited_once() {
        let config = config(&["cloud"]).with_retry(RetryConfig::no_backoff().with_max_attempts(2));
        let (replica, transport, orchestrator) = setup(config);
        create(&replica, "1");
        transport.fail_push("refused");

        for _ in 0..4 {
            orchestrator.sync_peer("cloud");
        }

        let escalations = replica.audit().by_operation(AuditOperation::Escalation);
        assert_eq!(escalations.len(), 1);
        assert_eq!(escalations[0].details["retry_count"], json!(2));
        let entry = &replica.journal().pending(1)[0];
        assert!(entry.escalated);
        assert_eq!(entry.retry_count, 4);
    }

    #[test]
    fn conflict_while_upload_backs_off() {
        let config = config(&["cloud"])
            .with_retry(RetryConfig::new())
            .with_conflict_policy(ConflictPolicy::ClientWins);
        let (replica, transport, orchestrator) = setup(config);
        create(&replica, "r");
        replica.update(PRODUCT, "r", fields(json!({"qty": 5}))).unwrap();
        transport.fail_push("refused");
        orchestrator.sync_peer("cloud");

        transport.recover();
        transport.set_pull_response(Ok(PullBatch {
            changes: vec![remote("r", 1, json!({"qty": 9}))],
            ..Default::default()
        }));
        let summary = orchestrator.sync_peer("cloud");

        assert_eq!(summary.conflicts, 1);
        let record = replica.get(PRODUCT, &RecordId::new("r")).unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(record.fields["qty"], json!(5));
        assert_eq!(replica.journal().pending_count_for("cloud"), 2);
    }

    #[test]
    fn peers_are_isolated() {
        let config = config(&["eu", "us"]);
        let replica = Arc::new(Replica::from_config(&config, registry()));
        let eu = Arc::new(MockTransport::new());
        let us = Arc::new(MockTransport::new());
        let orchestrator = SyncOrchestrator::new(replica.clone(), config.clone())
            .with_peer(config.peers[0].clone(), eu.clone())
            .with_peer(config.peers[1].clone(), us.clone());

        create(&replica, "1");
        eu.fail_push("eu down");
        let summary = orchestrator.sync_all();

        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(replica.checkpoints().get("eu").is_none());
        assert!(replica.checkpoints().get("us").is_some());
        assert_eq!(replica.journal().pending_count_for("eu"), 1);
        assert_eq!(replica.journal().pending_count_for("us"), 0);
    }
}
