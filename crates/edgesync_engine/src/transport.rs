//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use edgesync_protocol::ChangeRecord;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// What a peer reported for a pushed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReceipt {
    /// Changes the peer applied or already had.
    pub accepted_count: u64,
    /// Changes the peer reported as conflicting or rejected.
    pub conflict_count: u64,
    /// Per-change rejection messages.
    pub errors: Vec<String>,
}

/// Changes pulled from a peer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullBatch {
    /// Changes in the peer's order.
    pub changes: Vec<ChangeRecord>,
    /// Entries that could not be decoded, one message each.
    pub rejected: Vec<String>,
    /// Peer-reported watermark for the next pull.
    pub high_water_mark: Option<DateTime<Utc>>,
}

/// Push/pull against one remote peer.
///
/// Implementations must not retry internally: a failed call is reported to
/// the orchestrator, which leaves the journal entries for the next pass. A
/// failed push is assumed to have delivered nothing.
pub trait PeerTransport: Send + Sync {
    /// Pushes an ordered batch.
    fn push(&self, batch: &[ChangeRecord]) -> SyncResult<PushReceipt>;

    /// Pulls the peer's changes after `since` (everything if `None`).
    fn pull(&self, since: Option<DateTime<Utc>>) -> SyncResult<PullBatch>;
}

impl<T: PeerTransport + ?Sized> PeerTransport for Arc<T> {
    fn push(&self, batch: &[ChangeRecord]) -> SyncResult<PushReceipt> {
        (**self).push(batch)
    }

    fn pull(&self, since: Option<DateTime<Utc>>) -> SyncResult<PullBatch> {
        (**self).pull(since)
    }
}

/// A scripted transport for testing.
///
/// By default every pushed change is accepted and pulls return nothing.
#[derive(Debug, Default)]
pub struct MockTransport {
    push_responses: Mutex<VecDeque<SyncResult<PushReceipt>>>,
    pull_responses: Mutex<VecDeque<SyncResult<PullBatch>>>,
    push_failure: Mutex<Option<String>>,
    pull_failure: Mutex<Option<String>>,
    pushed: Mutex<Vec<Vec<ChangeRecord>>>,
    pulls: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the response to the next push.
    pub fn set_push_response(&self, response: SyncResult<PushReceipt>) {
        self.push_responses.lock().push_back(response);
    }

    /// Queues the response to the next pull.
    pub fn set_pull_response(&self, response: SyncResult<PullBatch>) {
        self.pull_responses.lock().push_back(response);
    }

    /// Fails every push until [`MockTransport::recover`].
    pub fn fail_push(&self, message: impl Into<String>) {
        *self.push_failure.lock() = Some(message.into());
    }

    /// Fails every pull until [`MockTransport::recover`].
    pub fn fail_pull(&self, message: impl Into<String>) {
        *self.pull_failure.lock() = Some(message.into());
    }

    /// Clears persistent failures.
    pub fn recover(&self) {
        *self.push_failure.lock() = None;
        *self.pull_failure.lock() = None;
    }

    /// Batches received so far, in call order.
    pub fn pushed_batches(&self) -> Vec<Vec<ChangeRecord>> {
        self.pushed.lock().clone()
    }

    /// `since` arguments received so far, in call order.
    pub fn pull_requests(&self) -> Vec<Option<DateTime<Utc>>> {
        self.pulls.lock().clone()
    }
}

impl PeerTransport for MockTransport {
    fn push(&self, batch: &[ChangeRecord]) -> SyncResult<PushReceipt> {
        if let Some(message) = self.push_failure.lock().clone() {
            return Err(SyncError::transport_retryable(message));
        }
        self.pushed.lock().push(batch.to_vec());
        self.push_responses.lock().pop_front().unwrap_or_else(|| {
            Ok(PushReceipt {
                accepted_count: batch.len() as u64,
                ..Default::default()
            })
        })
    }

    fn pull(&self, since: Option<DateTime<Utc>>) -> SyncResult<PullBatch> {
        self.pulls.lock().push(since);
        if let Some(message) = self.pull_failure.lock().clone() {
            return Err(SyncError::transport_retryable(message));
        }
        self.pull_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(PullBatch::default()))
    }
}
