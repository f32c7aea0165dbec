//! # EdgeSync Engine
//!
//! Change journal, sync orchestrator and transports for EdgeSync.
//!
//! This crate provides:
//! - The change journal with per-peer lanes, retry metadata and escalation
//! - Per-peer checkpoints and the append-only audit log
//! - The replica: domain records, mutation hooks and incoming-change apply
//! - The peer transport abstraction with an HTTP implementation
//! - The sync orchestrator (upload → download → finalize)
//! - A timer-driven scheduler and the administrative surface
//!
//! ## Architecture
//!
//! Every pass against a peer **uploads before it downloads**:
//! 1. Push the peer's journal lane in batches, marking entries processed
//! 2. Pull the peer's changes since its checkpoint and apply them
//! 3. Advance the checkpoint only if nothing fatal happened
//!
//! ## Key Invariants
//!
//! - A processed journal entry is never re-delivered
//! - A failed entry is retried before newer entries of the same lane
//! - Applying an incoming change is idempotent per record version
//! - One pass at a time per peer; a second request reports "already syncing"
//! - Errors never escape a pass; they land in the summary and the audit log

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod admin;
mod audit;
mod checkpoint;
mod config;
mod error;
mod http;
mod journal;
mod orchestrator;
mod record;
mod replica;
mod scheduler;
mod store;
mod transport;

pub use admin::{PeerStatus, QueueItem, SyncAdmin, SyncStatusReport, DEFAULT_LIMIT};
pub use audit::{AuditEntry, AuditLog, AuditOperation, AuditSnapshot, AuditStatus};
pub use checkpoint::{CheckpointStore, SyncCheckpoint};
pub use config::{NodeRole, PeerConfig, RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
#[cfg(feature = "reqwest")]
pub use http::ReqwestClient;
pub use http::{HttpClient, HttpResponse, HttpTransport, LoopbackClient, LoopbackServer};
pub use journal::{Journal, JournalEntry, JournalSnapshot};
pub use orchestrator::{SyncOrchestrator, SyncState, SyncStats, SyncSummary};
pub use record::{LocalRecord, MemoryRecordStore, RecordStore, SyncStatus};
pub use replica::{ApplyOutcome, Replica, Resolution};
pub use scheduler::{SchedulerHandle, SyncScheduler};
pub use store::{FileStateStore, MemoryStateStore, StateSnapshot, StateStore};
pub use transport::{MockTransport, PeerTransport, PullBatch, PushReceipt};
