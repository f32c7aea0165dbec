//! Change records.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Field name → value snapshot of a record, excluding sync metadata.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Kind of mutation carried by a change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Record was created.
    Create,
    /// Record was updated.
    Update,
    /// Record was (soft) deleted.
    Delete,
}

impl Operation {
    /// All operations, in upload group order.
    pub const ALL: [Operation; 3] = [Operation::Create, Operation::Update, Operation::Delete];

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(ProtocolError::UnknownOperation(other.to_string())),
        }
    }
}

/// Opaque record identifier.
///
/// On the wire an id may be a JSON string or integer; both decode to the
/// same textual form, and ids are always encoded as strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawRecordId", into = "String")]
pub struct RecordId(String);

impl RecordId {
    /// Creates a record id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for RecordId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRecordId {
    Text(String),
    Integer(i64),
}

impl From<RawRecordId> for RecordId {
    fn from(raw: RawRecordId) -> Self {
        match raw {
            RawRecordId::Text(s) => RecordId(s),
            RawRecordId::Integer(n) => RecordId(n.to_string()),
        }
    }
}

/// A single tracked mutation of one record.
///
/// Identity is `(record_type, record_id, version)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Record type, e.g. `inventory.product`.
    pub record_type: String,
    /// Record identifier.
    pub record_id: RecordId,
    /// Kind of mutation.
    pub operation: Operation,
    /// Field snapshot after the mutation.
    pub payload: Payload,
    /// Per-record version, starting at 1.
    pub version: u64,
    /// When the mutation happened.
    pub created_at: DateTime<Utc>,
}

impl ChangeRecord {
    /// Creates a change record stamped with the current time.
    pub fn new(
        record_type: impl Into<String>,
        record_id: impl Into<RecordId>,
        operation: Operation,
        payload: Payload,
        version: u64,
    ) -> ProtocolResult<Self> {
        if version == 0 {
            return Err(ProtocolError::InvalidVersion(version));
        }
        Ok(Self {
            record_type: record_type.into(),
            record_id: record_id.into(),
            operation,
            payload,
            version,
            created_at: Utc::now(),
        })
    }

    /// Returns the identity key of this change.
    pub fn key(&self) -> (&str, &RecordId, u64) {
        (&self.record_type, &self.record_id, self.version)
    }
}
