//! Local record model and storage seam.

use crate::error::SyncResult;
use chrono::{DateTime, Utc};
use edgesync_protocol::{Operation, Payload, RecordId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Sync status of a local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Not tracked (sync disabled when it was written).
    #[default]
    Local,
    /// Modified since last confirmed with the peer.
    Pending,
    /// Matches the peer.
    Synced,
    /// Held for manual resolution.
    Conflict,
    /// Soft-deleted.
    Deleted,
}

impl SyncStatus {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Local => "local",
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain record plus its sync metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    /// Record type.
    pub record_type: String,
    /// Record identifier.
    pub record_id: RecordId,
    /// Field snapshot, excluding sync metadata.
    pub fields: Payload,
    /// Per-record version.
    pub sync_version: u64,
    /// Sync status.
    pub sync_status: SyncStatus,
    /// Last write, local or applied.
    pub last_modified: DateTime<Utc>,
    /// Soft-delete timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl LocalRecord {
    /// Creates a record at version 1 with `local` status.
    pub fn new(record_type: impl Into<String>, record_id: RecordId, fields: Payload) -> Self {
        Self {
            record_type: record_type.into(),
            record_id,
            fields,
            sync_version: 1,
            sync_status: SyncStatus::Local,
            last_modified: Utc::now(),
            deleted_at: None,
        }
    }

    /// Returns true if the record is soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.sync_status == SyncStatus::Deleted || self.deleted_at.is_some()
    }

    /// Overwrites the given fields, leaving the others untouched.
    pub fn merge_fields(&mut self, fields: Payload) {
        for (name, value) in fields {
            self.fields.insert(name, value);
        }
    }

    /// Returns true if writing `operation` with `fields` would change the
    /// record. An absent field and an explicit null are the same value.
    pub fn differs_from(&self, operation: Operation, fields: &Payload) -> bool {
        if (operation == Operation::Delete) != self.is_deleted() {
            return true;
        }
        fields
            .iter()
            .any(|(name, value)| self.fields.get(name).unwrap_or(&Value::Null) != value)
    }
}

/// Storage for local records.
///
/// Implement this over the domain's own persistence; the engine only
/// needs keyed access and a modification-time scan.
pub trait RecordStore: Send + Sync {
    /// Fetches a record, including soft-deleted ones.
    fn get(&self, record_type: &str, record_id: &RecordId) -> SyncResult<Option<LocalRecord>>;

    /// Inserts or replaces a record.
    fn put(&self, record: LocalRecord) -> SyncResult<()>;

    /// Physically removes a record.
    fn remove(&self, record_type: &str, record_id: &RecordId) -> SyncResult<Option<LocalRecord>>;

    /// Records modified strictly after `since` (all if `None`), oldest first.
    fn changed_since(&self, since: Option<DateTime<Utc>>) -> SyncResult<Vec<LocalRecord>>;

    /// Every record.
    fn list(&self) -> SyncResult<Vec<LocalRecord>>;
}

/// In-memory record store.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<(String, RecordId), LocalRecord>>,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, record_type: &str, record_id: &RecordId) -> SyncResult<Option<LocalRecord>> {
        Ok(self
            .records
            .read()
            .get(&(record_type.to_string(), record_id.clone()))
            .cloned())
    }

    fn put(&self, record: LocalRecord) -> SyncResult<()> {
        self.records.write().insert(
            (record.record_type.clone(), record.record_id.clone()),
            record,
        );
        Ok(())
    }

    fn remove(&self, record_type: &str, record_id: &RecordId) -> SyncResult<Option<LocalRecord>> {
        Ok(self
            .records
            .write()
            .remove(&(record_type.to_string(), record_id.clone())))
    }

    fn changed_since(&self, since: Option<DateTime<Utc>>) -> SyncResult<Vec<LocalRecord>> {
        let mut changed: Vec<LocalRecord> = self
            .records
            .read()
            .values()
            .filter(|r| since.map_or(true, |s| r.last_modified > s))
            .cloned()
            .collect();
        changed.sort_by_key(|r| r.last_modified);
        Ok(changed)
    }

    fn list(&self) -> SyncResult<Vec<LocalRecord>> {
        Ok(self.records.read().values().cloned().collect())
    }
}
