//! The local replica: domain records plus the sync state around them.
//!
//! `Replica` is where domain mutations meet the journal. Local writes go
//! through [`Replica::create`], [`Replica::update`] and [`Replica::delete`],
//! which bump the record version and enqueue one journal entry per peer
//! lane. Incoming changes go through [`Replica::apply_incoming`], which runs
//! the version resolver and, on conflict, the configured policy.
//!
//! # Example
//!
//! ```
//! use edgesync_engine::{Replica, SyncStatus};
//! use edgesync_protocol::{FieldKind, Payload, RecordSchema, SchemaRegistry};
//! use serde_json::json;
//!
//! let registry = SchemaRegistry::new()
//!     .register(RecordSchema::new("inventory.product").field("name", FieldKind::Text));
//! let replica = Replica::new(registry).with_lanes(vec!["cloud".into()]);
//!
//! let mut fields = Payload::new();
//! fields.insert("name".into(), json!("Widget"));
//! let record = replica.create("inventory.product", "p-1", fields).unwrap();
//!
//! assert_eq!(record.sync_version, 1);
//! assert_eq!(record.sync_status, SyncStatus::Pending);
//! assert_eq!(replica.journal().pending_count(), 1);
//! ```

use crate::audit::{AuditEntry, AuditLog, AuditOperation, AuditStatus};
use crate::checkpoint::CheckpointStore;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::journal::Journal;
use crate::record::{LocalRecord, MemoryRecordStore, RecordStore, SyncStatus};
use crate::store::{MemoryStateStore, StateSnapshot, StateStore};
use chrono::Utc;
use edgesync_protocol::{
    resolve, ChangeRecord, ConflictPolicy, ConflictResolution, Decision, Operation, Payload,
    RecordId, SchemaRegistry, SyncParticipant,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of applying one incoming change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Incoming was newer and has been written.
    Applied,
    /// Already applied or stale; nothing changed.
    Ignored,
    /// A conflict was detected and handled by the policy.
    Conflict(ConflictResolution),
    /// The record awaits manual resolution and was left untouched.
    Held,
}

/// Operator decision for a record in `conflict` status.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Keep the local state and re-offer it at a new version.
    Local,
    /// Take the peer's payload captured when the conflict was detected.
    Remote,
    /// Write an operator-supplied payload and re-offer it.
    Merge(Payload),
}

impl Resolution {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Local => "local",
            Resolution::Remote => "remote",
            Resolution::Merge(_) => "merge",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain records, journal, checkpoints and audit log of one node.
pub struct Replica {
    registry: SchemaRegistry,
    records: Arc<dyn RecordStore>,
    journal: Journal,
    checkpoints: CheckpointStore,
    audit: AuditLog,
    state_store: Arc<dyn StateStore>,
    enabled: bool,
    lanes: Vec<String>,
    write_lock: Mutex<()>,
    persist_lock: Mutex<()>,
}

impl Replica {
    /// Creates a sync-enabled replica with in-memory storage and no lanes.
    pub fn new(registry: SchemaRegistry) -> Self {
        Self {
            registry,
            records: Arc::new(MemoryRecordStore::new()),
            journal: Journal::new(),
            checkpoints: CheckpointStore::new(),
            audit: AuditLog::new(),
            state_store: Arc::new(MemoryStateStore::new()),
            enabled: true,
            lanes: Vec::new(),
            write_lock: Mutex::new(()),
            persist_lock: Mutex::new(()),
        }
    }

    /// Creates a replica whose lanes and enablement follow a configuration.
    pub fn from_config(config: &SyncConfig, registry: SchemaRegistry) -> Self {
        Self::new(registry)
            .with_sync_enabled(config.enabled)
            .with_lanes(config.peer_keys())
    }

    /// Uses the given record store.
    pub fn with_record_store(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = records;
        self
    }

    /// Uses the given state store.
    pub fn with_state_store(mut self, state_store: Arc<dyn StateStore>) -> Self {
        self.state_store = state_store;
        self
    }

    /// Sets the journal lanes (one per peer key).
    pub fn with_lanes(mut self, lanes: Vec<String>) -> Self {
        self.lanes = lanes;
        self
    }

    /// Enables or disables change tracking.
    pub fn with_sync_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Loads persisted state. Returns false if nothing was saved yet.
    pub fn load_state(&self) -> SyncResult<bool> {
        let Some(snapshot) = self.state_store.load()? else {
            return Ok(false);
        };
        let _guard = self.write_lock.lock();
        self.journal.restore(snapshot.journal);
        self.checkpoints.restore(snapshot.checkpoints);
        self.audit.restore(snapshot.audit);
        for record in snapshot.records {
            self.records.put(record)?;
        }
        info!(
            pending = self.journal.pending_count(),
            audit_entries = self.audit.len(),
            "restored sync state"
        );
        Ok(true)
    }

    /// Saves journal, checkpoints, audit log and records.
    pub fn persist(&self) -> SyncResult<()> {
        let _guard = self.persist_lock.lock();
        let snapshot = StateSnapshot {
            journal: self.journal.snapshot(),
            checkpoints: self.checkpoints.all(),
            audit: self.audit.snapshot(),
            records: self.records.list()?,
        };
        self.state_store.save(&snapshot)
    }

    /// The schema registry.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// The change journal.
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Per-peer checkpoints.
    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// The audit log.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// The record store.
    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    /// Returns true if change tracking is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Journal lanes.
    pub fn lanes(&self) -> &[String] {
        &self.lanes
    }

    /// Fetches a record, including soft-deleted ones.
    pub fn get(&self, record_type: &str, record_id: &RecordId) -> SyncResult<Option<LocalRecord>> {
        self.records.get(record_type, record_id)
    }

    /// Creates a record.
    ///
    /// Re-creating a soft-deleted record continues its version sequence so
    /// the new state outranks the tombstone on every peer.
    ///
    /// Every local write is saved before it returns. When the save fails the
    /// write is rolled back and its journal entries are discarded.
    pub fn create(
        &self,
        record_type: &str,
        record_id: impl Into<RecordId>,
        fields: Payload,
    ) -> SyncResult<LocalRecord> {
        let record_id = record_id.into();
        let fields = self.registry.decode(record_type, &fields)?;

        let _guard = self.write_lock.lock();
        let previous = self.records.get(record_type, &record_id)?;
        if previous.as_ref().is_some_and(|r| !r.is_deleted()) {
            return Err(SyncError::RecordExists {
                record_type: record_type.to_string(),
                record_id,
            });
        }

        let mut record = LocalRecord::new(record_type, record_id, fields);
        if let Some(previous) = &previous {
            record.sync_version = previous.sync_version + 1;
        }
        if self.enabled {
            record.sync_status = SyncStatus::Pending;
        }
        self.records.put(record.clone())?;
        let enqueued = self.track(&record, Operation::Create)?;
        self.persist_or_undo(previous, &record, &enqueued)?;
        Ok(record)
    }

    /// Overwrites the given fields of a live record. Rolled back like
    /// `create` when the save fails.
    pub fn update(
        &self,
        record_type: &str,
        record_id: impl Into<RecordId>,
        fields: Payload,
    ) -> SyncResult<LocalRecord> {
        let record_id = record_id.into();
        let fields = self.registry.decode(record_type, &fields)?;

        let _guard = self.write_lock.lock();
        let mut record = self.live_record(record_type, record_id)?;
        let previous = record.clone();
        record.merge_fields(fields);
        record.sync_version += 1;
        record.last_modified = Utc::now();
        if self.enabled && record.sync_status != SyncStatus::Conflict {
            record.sync_status = SyncStatus::Pending;
        }
        self.records.put(record.clone())?;
        let enqueued = if record.sync_status == SyncStatus::Conflict {
            Vec::new()
        } else {
            self.track(&record, Operation::Update)?
        };
        self.persist_or_undo(Some(previous), &record, &enqueued)?;
        Ok(record)
    }

    /// Deletes a live record.
    ///
    /// With sync enabled this is a soft delete that is replicated; otherwise
    /// the record is removed. Rolled back like `create` when the save fails.
    pub fn delete(&self, record_type: &str, record_id: impl Into<RecordId>) -> SyncResult<()> {
        let record_id = record_id.into();
        self.registry.get(record_type)?;

        let _guard = self.write_lock.lock();
        let mut record = self.live_record(record_type, record_id)?;
        let previous = record.clone();
        if !self.enabled {
            self.records.remove(record_type, &record.record_id)?;
            return self.persist_or_undo(Some(previous), &record, &[]);
        }

        let now = Utc::now();
        record.sync_version += 1;
        record.sync_status = SyncStatus::Deleted;
        record.deleted_at = Some(now);
        record.last_modified = now;
        self.records.put(record.clone())?;
        let enqueued = self.track(&record, Operation::Delete)?;
        self.persist_or_undo(Some(previous), &record, &enqueued)
    }

    /// Creates or updates a typed record.
    pub fn save<T: SyncParticipant>(&self, item: &T) -> SyncResult<LocalRecord> {
        let record_id = item.record_id();
        let live = self
            .records
            .get(T::RECORD_TYPE, &record_id)?
            .is_some_and(|r| !r.is_deleted());
        if live {
            self.update(T::RECORD_TYPE, record_id, item.sync_data())
        } else {
            self.create(T::RECORD_TYPE, record_id, item.sync_data())
        }
    }

    /// Deletes a typed record.
    pub fn remove<T: SyncParticipant>(&self, item: &T) -> SyncResult<()> {
        self.delete(T::RECORD_TYPE, item.record_id())
    }

    /// Applies one change received from a peer.
    ///
    /// Nothing is journaled for applied changes, and nothing is persisted;
    /// callers persist once per batch.
    pub fn apply_incoming(
        &self,
        change: &ChangeRecord,
        policy: ConflictPolicy,
    ) -> SyncResult<ApplyOutcome> {
        let fields = self.registry.decode(&change.record_type, &change.payload)?;

        let _guard = self.write_lock.lock();
        let local = self.records.get(&change.record_type, &change.record_id)?;
        if local
            .as_ref()
            .is_some_and(|r| r.sync_status == SyncStatus::Conflict)
        {
            warn!(
                record_type = %change.record_type,
                record_id = %change.record_id,
                version = change.version,
                "record awaits manual resolution; incoming change held"
            );
            return Ok(ApplyOutcome::Held);
        }

        let local_version = local.as_ref().map_or(0, |r| r.sync_version);
        let pending = self.journal.has_pending(&change.record_type, &change.record_id);

        // Equal versions with different contents mean both sides edited
        // the record independently.
        let decision = match resolve(local_version, change.version, pending) {
            Decision::Ignore
                if change.version == local_version
                    && local
                        .as_ref()
                        .is_some_and(|r| r.differs_from(change.operation, &fields)) =>
            {
                Decision::Conflict
            }
            decision => decision,
        };

        match decision {
            Decision::Ignore => Ok(ApplyOutcome::Ignored),
            Decision::Apply => {
                self.write_incoming(local, change, fields)?;
                Ok(ApplyOutcome::Applied)
            }
            Decision::Conflict => {
                let local = local.ok_or_else(|| SyncError::RecordNotFound {
                    record_type: change.record_type.clone(),
                    record_id: change.record_id.clone(),
                })?;
                self.handle_conflict(local, change, fields, policy, pending)
            }
        }
    }

    /// Records changed after `since` as outgoing change records.
    ///
    /// Records written while sync was disabled are not offered.
    pub fn changes_since(
        &self,
        since: Option<chrono::DateTime<Utc>>,
    ) -> SyncResult<Vec<ChangeRecord>> {
        Ok(self
            .records
            .changed_since(since)?
            .into_iter()
            .filter(|r| r.sync_status != SyncStatus::Local && self.registry.contains(&r.record_type))
            .map(|r| ChangeRecord {
                operation: if r.is_deleted() {
                    Operation::Delete
                } else {
                    Operation::Update
                },
                record_type: r.record_type,
                record_id: r.record_id,
                payload: r.fields,
                version: r.sync_version,
                created_at: r.last_modified,
            })
            .collect())
    }

    /// Settles a record held in `conflict` status.
    pub fn resolve_conflict(
        &self,
        record_type: &str,
        record_id: impl Into<RecordId>,
        resolution: Resolution,
    ) -> SyncResult<LocalRecord> {
        let record_id = record_id.into();
        let _guard = self.write_lock.lock();

        let mut record = self.records.get(record_type, &record_id)?.ok_or_else(|| {
            SyncError::RecordNotFound {
                record_type: record_type.to_string(),
                record_id: record_id.clone(),
            }
        })?;
        if record.sync_status != SyncStatus::Conflict {
            return Err(SyncError::NotInConflict {
                record_type: record_type.to_string(),
                record_id,
            });
        }

        let detected = self.audit.latest_conflict(record_type, &record_id);
        let cloud_version = detected
            .as_ref()
            .and_then(|e| e.details.get("cloud_version"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let now = Utc::now();

        match &resolution {
            Resolution::Local => {
                record.sync_version = record.sync_version.max(cloud_version) + 1;
                record.sync_status = SyncStatus::Pending;
            }
            Resolution::Remote => {
                let detected = detected.ok_or_else(|| {
                    SyncError::InvalidResolution(format!(
                        "no recorded conflict payload for {record_type}/{record_id}"
                    ))
                })?;
                let cloud_data = detected
                    .details
                    .get("cloud_data")
                    .and_then(Value::as_object)
                    .ok_or_else(|| {
                        SyncError::InvalidResolution("conflict entry has no cloud_data".into())
                    })?;
                let fields = self.registry.decode(record_type, cloud_data)?;
                let remote_delete = detected.details.get("operation") == Some(&json!("delete"));

                record.merge_fields(fields);
                record.sync_version = record.sync_version.max(cloud_version);
                if remote_delete {
                    record.sync_status = SyncStatus::Deleted;
                    record.deleted_at = Some(record.deleted_at.unwrap_or(now));
                } else {
                    record.sync_status = SyncStatus::Synced;
                    record.deleted_at = None;
                }
            }
            Resolution::Merge(payload) => {
                let fields = self.registry.decode(record_type, payload)?;
                record.merge_fields(fields);
                record.sync_version = record.sync_version.max(cloud_version) + 1;
                record.sync_status = SyncStatus::Pending;
            }
        }
        record.last_modified = now;
        self.records.put(record.clone())?;

        if record.sync_status == SyncStatus::Pending {
            let operation = if record.is_deleted() {
                Operation::Delete
            } else {
                Operation::Update
            };
            self.track(&record, operation)?;
        } else {
            self.journal
                .supersede(record_type, &record.record_id, "resolved in favour of remote");
        }

        self.audit.append(
            AuditEntry::new(AuditOperation::Conflict, AuditStatus::Success, "conflict resolved")
                .with_subject(record_type, record.record_id.clone())
                .with_details(json!({
                    "resolution": resolution.as_str(),
                    "sync_version": record.sync_version,
                    "cloud_version": cloud_version,
                })),
        );
        info!(
            record_type,
            record_id = %record.record_id,
            resolution = %resolution,
            version = record.sync_version,
            "conflict resolved"
        );
        self.persist()?;
        Ok(record)
    }

    fn live_record(&self, record_type: &str, record_id: RecordId) -> SyncResult<LocalRecord> {
        match self.records.get(record_type, &record_id)? {
            Some(record) if !record.is_deleted() => Ok(record),
            _ => Err(SyncError::RecordNotFound {
                record_type: record_type.to_string(),
                record_id,
            }),
        }
    }

    /// Persists a local write. If that fails the write is undone, so an
    /// error returned to the caller leaves nothing queued for sync.
    fn persist_or_undo(
        &self,
        previous: Option<LocalRecord>,
        record: &LocalRecord,
        enqueued: &[u64],
    ) -> SyncResult<()> {
        let Err(e) = self.persist() else {
            return Ok(());
        };
        self.journal.discard(enqueued);
        let restored = match previous {
            Some(previous) => self.records.put(previous),
            None => self
                .records
                .remove(&record.record_type, &record.record_id)
                .map(|_| ()),
        };
        if let Err(undo) = restored {
            warn!(error = %undo, "failed to restore record after persist failure");
        }
        warn!(
            record_type = %record.record_type,
            record_id = %record.record_id,
            error = %e,
            "local write rolled back"
        );
        Err(e)
    }

    /// Enqueues the record's current state on every lane and returns the
    /// new entry ids.
    fn track(&self, record: &LocalRecord, operation: Operation) -> SyncResult<Vec<u64>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        let change = ChangeRecord::new(
            record.record_type.clone(),
            record.record_id.clone(),
            operation,
            record.fields.clone(),
            record.sync_version,
        )?;
        let mut enqueued = Vec::with_capacity(self.lanes.len());
        for lane in &self.lanes {
            if let Some(entry_id) = self.journal.enqueue(lane, change.clone()) {
                enqueued.push(entry_id);
                debug!(
                    peer = %lane,
                    entry_id,
                    record_type = %record.record_type,
                    record_id = %record.record_id,
                    version = record.sync_version,
                    "change enqueued"
                );
            }
        }
        Ok(enqueued)
    }

    fn write_incoming(
        &self,
        local: Option<LocalRecord>,
        change: &ChangeRecord,
        fields: Payload,
    ) -> SyncResult<()> {
        let now = Utc::now();
        let mut record = match local {
            Some(record) => record,
            None => LocalRecord::new(&change.record_type, change.record_id.clone(), Payload::new()),
        };

        record.merge_fields(fields);
        if change.operation == Operation::Delete {
            record.sync_status = SyncStatus::Deleted;
            record.deleted_at = Some(record.deleted_at.unwrap_or(now));
        } else {
            record.sync_status = SyncStatus::Synced;
            record.deleted_at = None;
        }
        record.sync_version = change.version;
        record.last_modified = now;
        self.records.put(record)?;

        let superseded = self.journal.supersede(
            &change.record_type,
            &change.record_id,
            &format!("superseded by incoming version {}", change.version),
        );
        debug!(
            record_type = %change.record_type,
            record_id = %change.record_id,
            version = change.version,
            operation = %change.operation,
            superseded,
            "incoming change applied"
        );
        Ok(())
    }

    fn handle_conflict(
        &self,
        mut local: LocalRecord,
        change: &ChangeRecord,
        fields: Payload,
        policy: ConflictPolicy,
        pending: bool,
    ) -> SyncResult<ApplyOutcome> {
        let resolution = policy.resolution();
        warn!(
            record_type = %change.record_type,
            record_id = %change.record_id,
            local_version = local.sync_version,
            cloud_version = change.version,
            policy = %policy,
            "sync conflict detected"
        );

        match resolution {
            ConflictResolution::AppliedRemote => {
                self.write_incoming(Some(local), change, fields)?;
            }
            ConflictResolution::KeptLocalPending => {
                // Unless a pending entry already outranks the incoming
                // version, re-offer the local copy above it.
                let outranked = !pending || change.version >= local.sync_version;
                if outranked {
                    local.sync_version = local.sync_version.max(change.version) + 1;
                    local.last_modified = Utc::now();
                }
                local.sync_status = SyncStatus::Pending;
                self.records.put(local.clone())?;
                if outranked {
                    let operation = if local.is_deleted() {
                        Operation::Delete
                    } else {
                        Operation::Update
                    };
                    self.track(&local, operation)?;
                }
            }
            ConflictResolution::MarkedForReview => {
                let local_version = local.sync_version;
                local.sync_status = SyncStatus::Conflict;
                self.records.put(local)?;
                self.audit.append(
                    AuditEntry::new(
                        AuditOperation::Conflict,
                        AuditStatus::Error,
                        "sync conflict detected",
                    )
                    .with_subject(change.record_type.clone(), change.record_id.clone())
                    .with_details(json!({
                        "local_version": local_version,
                        "cloud_version": change.version,
                        "operation": change.operation,
                        "cloud_data": Value::Object(change.payload.clone()),
                    })),
                );
            }
        }
        Ok(ApplyOutcome::Conflict(resolution))
    }
}
