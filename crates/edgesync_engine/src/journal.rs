//! Change journal: durable, ordered queue of changes awaiting delivery.
//!
//! Each peer has its own lane. A mutation is enqueued once per lane, and
//! an entry's identity is `(peer_key, record_type, record_id, version)`.
//!
//! # Invariants
//!
//! - Entry ids are assigned in enqueue order; a lane is read in id order.
//! - An entry with `processed_at` set is never returned for delivery.
//! - Failed entries keep their position, so an older entry is always
//!   offered before newer entries of the same lane.
//! - Entries are only removed by an explicit purge or clear.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use edgesync_protocol::{ChangeRecord, RecordId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

type EntryKey = (String, String, RecordId, u64);

/// A change plus its delivery metadata for one peer lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Journal-wide id, monotonic in enqueue order.
    pub id: u64,
    /// Lane (peer key) this entry is delivered to.
    pub peer_key: String,
    /// The tracked change.
    pub change: ChangeRecord,
    /// When delivery was confirmed.
    pub processed_at: Option<DateTime<Utc>>,
    /// Failed delivery attempts.
    pub retry_count: u32,
    /// Error of the most recent failed attempt.
    pub last_error: Option<String>,
    /// When the most recent failed attempt happened.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Whether an escalation has been recorded for this entry.
    #[serde(default)]
    pub escalated: bool,
}

impl JournalEntry {
    /// Returns true if the entry is eligible for delivery.
    pub fn is_pending(&self) -> bool {
        self.processed_at.is_none()
    }

    fn key(&self) -> EntryKey {
        (
            self.peer_key.clone(),
            self.change.record_type.clone(),
            self.change.record_id.clone(),
            self.change.version,
        )
    }
}

/// Serializable journal contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalSnapshot {
    /// Next id to assign.
    pub next_id: u64,
    /// All retained entries, in id order.
    pub entries: Vec<JournalEntry>,
}

#[derive(Default)]
struct JournalInner {
    next_id: u64,
    entries: BTreeMap<u64, JournalEntry>,
    index: HashMap<EntryKey, u64>,
}

impl JournalInner {
    fn entry_mut(&mut self, id: u64) -> SyncResult<&mut JournalEntry> {
        self.entries.get_mut(&id).ok_or(SyncError::UnknownEntry(id))
    }

    fn remove_where(&mut self, predicate: impl Fn(&JournalEntry) -> bool) -> usize {
        let doomed: Vec<u64> = self
            .entries
            .values()
            .filter(|e| predicate(e))
            .map(|e| e.id)
            .collect();
        for id in &doomed {
            if let Some(entry) = self.entries.remove(id) {
                self.index.remove(&entry.key());
            }
        }
        doomed.len()
    }
}

/// The change journal.
///
/// All mutation goes through this type's methods; callers never edit
/// entries in place.
#[derive(Default)]
pub struct Journal {
    inner: RwLock<JournalInner>,
}

impl Journal {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a journal from a snapshot.
    pub fn from_snapshot(snapshot: JournalSnapshot) -> Self {
        let journal = Self::new();
        journal.restore(snapshot);
        journal
    }

    /// Replaces the contents with a snapshot.
    pub fn restore(&self, snapshot: JournalSnapshot) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.index.clear();
        let mut next_id = snapshot.next_id;
        for entry in snapshot.entries {
            next_id = next_id.max(entry.id + 1);
            inner.index.insert(entry.key(), entry.id);
            inner.entries.insert(entry.id, entry);
        }
        inner.next_id = next_id;
    }

    /// Returns a snapshot of the journal.
    pub fn snapshot(&self) -> JournalSnapshot {
        let inner = self.inner.read();
        JournalSnapshot {
            next_id: inner.next_id,
            entries: inner.entries.values().cloned().collect(),
        }
    }

    /// Enqueues a change on a lane.
    ///
    /// Returns the new entry id, or `None` if an entry with the same
    /// `(peer_key, record_type, record_id, version)` already exists.
    pub fn enqueue(&self, peer_key: &str, change: ChangeRecord) -> Option<u64> {
        let mut inner = self.inner.write();
        let key = (
            peer_key.to_string(),
            change.record_type.clone(),
            change.record_id.clone(),
            change.version,
        );
        if inner.index.contains_key(&key) {
            return None;
        }

        let id = inner.next_id.max(1);
        inner.next_id = id + 1;
        inner.index.insert(key, id);
        inner.entries.insert(
            id,
            JournalEntry {
                id,
                peer_key: peer_key.to_string(),
                change,
                processed_at: None,
                retry_count: 0,
                last_error: None,
                last_attempt_at: None,
                escalated: false,
            },
        );
        Some(id)
    }

    /// Returns up to `max` pending entries of a lane, oldest first.
    ///
    /// Read-only: entries stay pending until marked.
    pub fn dequeue_batch(&self, peer_key: &str, max: usize) -> Vec<JournalEntry> {
        self.inner
            .read()
            .entries
            .values()
            .filter(|e| e.peer_key == peer_key && e.is_pending())
            .take(max)
            .cloned()
            .collect()
    }

    /// Returns pending entries across all lanes, oldest first.
    pub fn pending(&self, limit: usize) -> Vec<JournalEntry> {
        self.inner
            .read()
            .entries
            .values()
            .filter(|e| e.is_pending())
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns an entry by id.
    pub fn get(&self, id: u64) -> Option<JournalEntry> {
        self.inner.read().entries.get(&id).cloned()
    }

    /// Marks an entry delivered. Marking twice keeps the first timestamp.
    pub fn mark_processed(&self, id: u64) -> SyncResult<()> {
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(id)?;
        if entry.processed_at.is_none() {
            entry.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Records a failed delivery attempt and returns the new retry count.
    ///
    /// The entry stays eligible for redelivery.
    pub fn mark_failed(&self, id: u64, error: &str) -> SyncResult<u32> {
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(id)?;
        if entry.processed_at.is_some() {
            return Ok(entry.retry_count);
        }
        entry.retry_count += 1;
        entry.last_error = Some(error.to_string());
        entry.last_attempt_at = Some(Utc::now());
        Ok(entry.retry_count)
    }

    /// Flags an entry as escalated. Returns false if it already was.
    pub fn mark_escalated(&self, id: u64) -> SyncResult<bool> {
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(id)?;
        let first = !entry.escalated;
        entry.escalated = true;
        Ok(first)
    }

    /// Marks every pending entry of a record processed, on all lanes.
    ///
    /// Used when the local edit was overwritten by the peer's version and
    /// must not be re-offered. Returns the number of entries affected.
    pub fn supersede(&self, record_type: &str, record_id: &RecordId, note: &str) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.write();
        let mut count = 0;
        for entry in inner.entries.values_mut() {
            if entry.is_pending()
                && entry.change.record_type == record_type
                && &entry.change.record_id == record_id
            {
                entry.processed_at = Some(now);
                entry.last_error = Some(note.to_string());
                count += 1;
            }
        }
        count
    }

    /// Returns true if any lane holds a pending entry for the record.
    pub fn has_pending(&self, record_type: &str, record_id: &RecordId) -> bool {
        self.inner.read().entries.values().any(|e| {
            e.is_pending() && e.change.record_type == record_type && &e.change.record_id == record_id
        })
    }

    /// Number of pending entries across all lanes.
    pub fn pending_count(&self) -> usize {
        self.inner
            .read()
            .entries
            .values()
            .filter(|e| e.is_pending())
            .count()
    }

    /// Number of pending entries on one lane.
    pub fn pending_count_for(&self, peer_key: &str) -> usize {
        self.inner
            .read()
            .entries
            .values()
            .filter(|e| e.peer_key == peer_key && e.is_pending())
            .count()
    }

    /// Total number of retained entries.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Returns true if no entries are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deletes processed entries confirmed before `before`.
    pub fn purge_processed(&self, before: DateTime<Utc>) -> usize {
        self.inner
            .write()
            .remove_where(|e| e.processed_at.is_some_and(|at| at < before))
    }

    /// Deletes every pending entry.
    pub fn clear_pending(&self) -> usize {
        self.inner.write().remove_where(JournalEntry::is_pending)
    }

    /// Deletes the given entries, whatever their state.
    pub fn discard(&self, ids: &[u64]) -> usize {
        self.inner.write().remove_where(|e| ids.contains(&e.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use edgesync_protocol::{Operation, Payload};

    fn change(id: &str, version: u64) -> ChangeRecord {
        ChangeRecord::new("inventory.product", id, Operation::Update, Payload::new(), version)
            .unwrap()
    }

    #[test]
    fn enqueue_is_idempotent() {
        let journal = Journal::new();
        assert!(journal.enqueue("cloud", change("1", 1)).is_some());
        assert!(journal.enqueue("cloud", change("1", 1)).is_none());
        assert_eq!(journal.len(), 1);

        // Same change on another lane is a separate entry.
        assert!(journal.enqueue("peer", change("1", 1)).is_some());
        // Next version of the same record is new.
        assert!(journal.enqueue("cloud", change("1", 2)).is_some());
        assert_eq!(journal.len(), 3);
    }

    #[test]
    fn discarded_entries_can_be_enqueued_again() {
        let journal = Journal::new();
        let keep = journal.enqueue("cloud", change("1", 1)).unwrap();
        let drop = journal.enqueue("cloud", change("1", 2)).unwrap();

        assert_eq!(journal.discard(&[drop, 999]), 1);
        assert!(journal.get(drop).is_none());
        assert!(journal.get(keep).is_some());
        assert!(journal.enqueue("cloud", change("1", 2)).is_some());
    }

    #[test]
    fn reenqueue_after_processing_is_noop() {
        let journal = Journal::new();
        let id = journal.enqueue("cloud", change("1", 1)).unwrap();
        journal.mark_processed(id).unwrap();

        assert!(journal.enqueue("cloud", change("1", 1)).is_none());
        assert_eq!(journal.pending_count(), 0);
    }

    #[test]
    fn dequeue_is_fifo_bounded_and_read_only() {
        let journal = Journal::new();
        for i in 1..=5 {
            journal.enqueue("cloud", change(&i.to_string(), 1));
        }

        let batch = journal.dequeue_batch("cloud", 3);
        let ids: Vec<_> = batch.iter().map(|e| e.change.record_id.to_string()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        // Nothing was consumed.
        assert_eq!(journal.dequeue_batch("cloud", 10).len(), 5);
        assert!(journal.dequeue_batch("other", 10).is_empty());
    }

    #[test]
    fn failed_entries_keep_their_position() {
        let journal = Journal::new();
        let first = journal.enqueue("cloud", change("1", 1)).unwrap();
        let second = journal.enqueue("cloud", change("2", 1)).unwrap();

        assert_eq!(journal.mark_failed(first, "connection refused").unwrap(), 1);
        assert_eq!(journal.mark_failed(second, "connection refused").unwrap(), 1);
        journal.enqueue("cloud", change("3", 1));

        let batch = journal.dequeue_batch("cloud", 10);
        assert_eq!(batch[0].id, first);
        assert_eq!(batch[1].id, second);
        assert_eq!(batch[0].retry_count, 1);
        assert_eq!(batch[0].last_error.as_deref(), Some("connection refused"));
        assert!(batch[0].last_attempt_at.is_some());
        assert!(batch[0].is_pending());
    }

    #[test]
    fn processed_entries_are_not_redelivered() {
        let journal = Journal::new();
        let id = journal.enqueue("cloud", change("1", 1)).unwrap();
        journal.mark_processed(id).unwrap();

        assert!(journal.dequeue_batch("cloud", 10).is_empty());
        // A late failure report does not resurrect it.
        assert_eq!(journal.mark_failed(id, "late").unwrap(), 0);
        assert!(!journal.get(id).unwrap().is_pending());
    }

    #[test]
    fn unknown_entry() {
        let journal = Journal::new();
        assert!(matches!(journal.mark_processed(9), Err(SyncError::UnknownEntry(9))));
    }

    #[test]
    fn supersede_and_has_pending() {
        let journal = Journal::new();
        journal.enqueue("a", change("1", 2));
        journal.enqueue("b", change("1", 2));
        journal.enqueue("a", change("2", 1));
        let rid = RecordId::new("1");

        assert!(journal.has_pending("inventory.product", &rid));
        assert_eq!(journal.supersede("inventory.product", &rid, "overwritten"), 2);
        assert!(!journal.has_pending("inventory.product", &rid));
        assert_eq!(journal.pending_count(), 1);
    }

    #[test]
    fn purge_only_touches_old_processed_entries() {
        let journal = Journal::new();
        let done = journal.enqueue("cloud", change("1", 1)).unwrap();
        journal.enqueue("cloud", change("2", 1));
        journal.mark_processed(done).unwrap();

        assert_eq!(journal.purge_processed(Utc::now() - Duration::hours(1)), 0);
        assert_eq!(journal.purge_processed(Utc::now() + Duration::seconds(1)), 1);
        assert_eq!(journal.len(), 1);
        assert_eq!(journal.pending_count(), 1);
    }

    #[test]
    fn clear_pending() {
        let journal = Journal::new();
        let done = journal.enqueue("cloud", change("1", 1)).unwrap();
        journal.enqueue("cloud", change("2", 1));
        journal.enqueue("peer", change("2", 1));
        journal.mark_processed(done).unwrap();

        assert_eq!(journal.clear_pending(), 2);
        assert_eq!(journal.len(), 1);
        // Cleared keys can be enqueued again.
        assert!(journal.enqueue("cloud", change("2", 1)).is_some());
    }

    #[test]
    fn snapshot_restores_ids_and_index() {
        let journal = Journal::new();
        journal.enqueue("cloud", change("1", 1));
        let id = journal.enqueue("cloud", change("2", 1)).unwrap();
        journal.mark_failed(id, "timeout").unwrap();

        let restored = Journal::from_snapshot(journal.snapshot());
        assert_eq!(restored.len(), 2);
        assert!(restored.enqueue("cloud", change("1", 1)).is_none());
        assert_eq!(restored.enqueue("cloud", change("3", 1)), Some(id + 1));
        assert_eq!(restored.get(id).unwrap().retry_count, 1);
    }
}
