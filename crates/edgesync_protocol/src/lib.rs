//! # EdgeSync Protocol
//!
//! Change records, wire messages and version resolution for EdgeSync.
//!
//! This crate provides:
//! - `ChangeRecord` for tracked mutations
//! - Upload/download wire messages (JSON)
//! - The version resolver (apply / ignore / conflict)
//! - Conflict policies
//! - The static schema registry for sync-enabled record types
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod error;
mod messages;
mod operation;
mod resolver;
pub mod schema;

pub use conflict::{ConflictPolicy, ConflictResolution};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    DecodedChanges, DownloadChange, DownloadResponse, UploadChanges, UploadRequest,
    UploadResponse, WireChange,
};
pub use operation::{ChangeRecord, Operation, Payload, RecordId};
pub use resolver::{resolve, Decision};
pub use schema::{FieldKind, FieldSpec, RecordSchema, SchemaRegistry, SyncParticipant};
