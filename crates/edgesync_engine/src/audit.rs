//! Append-only audit log.

use chrono::{DateTime, Utc};
use edgesync_protocol::RecordId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What an audit entry is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOperation {
    /// Changes pushed to a peer, or received by upload.
    Upload,
    /// Changes pulled from a peer, or served by download.
    Download,
    /// Summary of a full pass.
    Sync,
    /// Conflict detected or resolved.
    Conflict,
    /// Pass aborted.
    Error,
    /// Journal entry exceeded its retry threshold.
    Escalation,
    /// Operator action.
    Admin,
}

/// Outcome recorded in an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    /// Completed without errors.
    Success,
    /// Failed.
    Error,
    /// Completed with per-record errors.
    Partial,
}

/// An immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Assigned on append, monotonic.
    pub id: u64,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Kind of event.
    pub operation: AuditOperation,
    /// Record type of the subject, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_type: Option<String>,
    /// Record id of the subject, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<RecordId>,
    /// Outcome.
    pub status: AuditStatus,
    /// Human-readable message.
    pub message: String,
    /// Structured details.
    #[serde(default)]
    pub details: Value,
}

impl AuditEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(operation: AuditOperation, status: AuditStatus, message: impl Into<String>) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            operation,
            record_type: None,
            record_id: None,
            status,
            message: message.into(),
            details: Value::Null,
        }
    }

    /// Sets the subject record.
    pub fn with_subject(mut self, record_type: impl Into<String>, record_id: RecordId) -> Self {
        self.record_type = Some(record_type.into());
        self.record_id = Some(record_id);
        self
    }

    /// Sets structured details.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Returns true if the entry is about the given record.
    pub fn is_about(&self, record_type: &str, record_id: &RecordId) -> bool {
        self.record_type.as_deref() == Some(record_type) && self.record_id.as_ref() == Some(record_id)
    }
}

/// Serializable audit contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditSnapshot {
    /// Next id to assign.
    pub next_id: u64,
    /// Entries in append order.
    pub entries: Vec<AuditEntry>,
}

/// The audit log. Entries are never mutated or removed by the engine.
#[derive(Default)]
pub struct AuditLog {
    inner: RwLock<AuditSnapshot>,
}

impl AuditLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry and returns its id.
    pub fn append(&self, mut entry: AuditEntry) -> u64 {
        let mut inner = self.inner.write();
        let id = inner.next_id.max(1);
        inner.next_id = id + 1;
        entry.id = id;
        inner.entries.push(entry);
        id
    }

    /// Newest entries first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        self.inner
            .read()
            .entries
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Entries with the given operation, oldest first.
    pub fn by_operation(&self, operation: AuditOperation) -> Vec<AuditEntry> {
        self.inner
            .read()
            .entries
            .iter()
            .filter(|e| e.operation == operation)
            .cloned()
            .collect()
    }

    /// Most recent conflict detection for a record.
    pub fn latest_conflict(&self, record_type: &str, record_id: &RecordId) -> Option<AuditEntry> {
        self.inner
            .read()
            .entries
            .iter()
            .rev()
            .find(|e| {
                e.operation == AuditOperation::Conflict
                    && e.status == AuditStatus::Error
                    && e.is_about(record_type, record_id)
            })
            .cloned()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Returns true if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot of the log.
    pub fn snapshot(&self) -> AuditSnapshot {
        self.inner.read().clone()
    }

    /// Replaces the contents.
    pub fn restore(&self, snapshot: AuditSnapshot) {
        let next_id = snapshot
            .entries
            .iter()
            .map(|e| e.id + 1)
            .max()
            .unwrap_or(1)
            .max(snapshot.next_id);
        *self.inner.write() = AuditSnapshot {
            next_id,
            entries: snapshot.entries,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn append_and_recent() {
        let log = AuditLog::new();
        log.append(AuditEntry::new(AuditOperation::Upload, AuditStatus::Success, "one"));
        log.append(AuditEntry::new(AuditOperation::Sync, AuditStatus::Partial, "two"));
        log.append(AuditEntry::new(AuditOperation::Error, AuditStatus::Error, "three"));

        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "three");
        assert_eq!(recent[1].message, "two");
        assert!(recent[0].id > recent[1].id);
        assert_eq!(log.by_operation(AuditOperation::Upload).len(), 1);
    }

    #[test]
    fn latest_conflict_for_record() {
        let log = AuditLog::new();
        let rid = RecordId::new("7");
        log.append(
            AuditEntry::new(AuditOperation::Conflict, AuditStatus::Error, "first")
                .with_subject("inventory.product", rid.clone())
                .with_details(json!({"cloud_version": 1})),
        );
        log.append(
            AuditEntry::new(AuditOperation::Conflict, AuditStatus::Error, "second")
                .with_subject("inventory.product", rid.clone())
                .with_details(json!({"cloud_version": 2})),
        );
        log.append(
            AuditEntry::new(AuditOperation::Conflict, AuditStatus::Success, "resolved")
                .with_subject("inventory.product", rid.clone()),
        );

        let found = log.latest_conflict("inventory.product", &rid).unwrap();
        assert_eq!(found.details["cloud_version"], json!(2));
        assert!(log.latest_conflict("inventory.product", &RecordId::new("8")).is_none());
    }

    #[test]
    fn wire_shape() {
        let entry = AuditEntry::new(AuditOperation::Escalation, AuditStatus::Error, "stuck");
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["operation"], json!("escalation"));
        assert_eq!(value["status"], json!("error"));
        assert!(value.get("record_type").is_none());
    }

    #[test]
    fn restore_continues_ids() {
        let log = AuditLog::new();
        log.append(AuditEntry::new(AuditOperation::Admin, AuditStatus::Success, "a"));
        let restored = AuditLog::new();
        restored.restore(log.snapshot());
        assert_eq!(
            restored.append(AuditEntry::new(AuditOperation::Admin, AuditStatus::Success, "b")),
            2
        );
    }
}
