//! Wire messages for upload and download.
//!
//! Bodies are JSON:
//! - `POST /sync/upload` with `{changes: {create: [...], update: [...], delete: [...]}}`,
//!   answered by `{processed, conflicts}`
//! - `GET /sync/download?since=<RFC 3339>` answered by `{changes: [...]}`

use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::{ChangeRecord, Operation, Payload, RecordId};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_version() -> u64 {
    1
}

fn default_operation() -> Operation {
    Operation::Update
}

/// One change inside an upload group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireChange {
    /// Record type.
    pub model: String,
    /// Record identifier.
    pub id: RecordId,
    /// Field snapshot.
    #[serde(default)]
    pub data: Payload,
    /// Record version.
    #[serde(default = "default_version")]
    pub version: u64,
}

impl WireChange {
    fn into_change_record(
        self,
        operation: Operation,
        received_at: DateTime<Utc>,
    ) -> ProtocolResult<ChangeRecord> {
        if self.version == 0 {
            return Err(ProtocolError::InvalidVersion(0));
        }
        Ok(ChangeRecord {
            record_type: self.model,
            record_id: self.id,
            operation,
            payload: self.data,
            version: self.version,
            created_at: received_at,
        })
    }
}

/// Upload changes grouped by operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadChanges {
    /// Creates, in journal order.
    #[serde(default)]
    pub create: Vec<WireChange>,
    /// Updates, in journal order.
    #[serde(default)]
    pub update: Vec<WireChange>,
    /// Deletes, in journal order.
    #[serde(default)]
    pub delete: Vec<WireChange>,
}

impl UploadChanges {
    /// Returns the group for an operation.
    pub fn group(&self, operation: Operation) -> &[WireChange] {
        match operation {
            Operation::Create => &self.create,
            Operation::Update => &self.update,
            Operation::Delete => &self.delete,
        }
    }

    fn group_mut(&mut self, operation: Operation) -> &mut Vec<WireChange> {
        match operation {
            Operation::Create => &mut self.create,
            Operation::Update => &mut self.update,
            Operation::Delete => &mut self.delete,
        }
    }

    /// Total number of changes across all groups.
    pub fn len(&self) -> usize {
        self.create.len() + self.update.len() + self.delete.len()
    }

    /// Returns true if there are no changes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Body of `POST /sync/upload`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Changes grouped by operation.
    #[serde(default)]
    pub changes: UploadChanges,
}

impl UploadRequest {
    /// Builds a request from a journal batch.
    ///
    /// Changes are grouped by operation; order inside each group follows
    /// the batch order.
    pub fn from_batch(batch: &[ChangeRecord]) -> Self {
        let mut changes = UploadChanges::default();
        for change in batch {
            changes.group_mut(change.operation).push(WireChange {
                model: change.record_type.clone(),
                id: change.record_id.clone(),
                data: change.payload.clone(),
                version: change.version,
            });
        }
        Self { changes }
    }

    /// Flattens the request back into change records, group by group.
    ///
    /// An entry with an invalid version is rejected on its own.
    pub fn into_changes(self) -> DecodedChanges {
        let received_at = Utc::now();
        let UploadChanges {
            create,
            update,
            delete,
        } = self.changes;

        let mut out = DecodedChanges::default();
        for (operation, group) in [
            (Operation::Create, create),
            (Operation::Update, update),
            (Operation::Delete, delete),
        ] {
            for change in group {
                let label = format!("{}/{}", change.model, change.id);
                out.push(label, change.into_change_record(operation, received_at));
            }
        }
        out
    }

    /// Decodes a body, converting each change on its own.
    ///
    /// Only a body that is not an upload at all fails; malformed entries are
    /// reported in [`DecodedChanges::rejected`].
    pub fn decode_changes(bytes: &[u8]) -> ProtocolResult<DecodedChanges> {
        let raw: RawUploadRequest = serde_json::from_slice(bytes)?;
        let received_at = Utc::now();
        let mut out = DecodedChanges::default();
        for (operation, group) in [
            (Operation::Create, raw.changes.create),
            (Operation::Update, raw.changes.update),
            (Operation::Delete, raw.changes.delete),
        ] {
            for (index, value) in group.into_iter().enumerate() {
                let label = entry_label(&value, operation.as_str(), index);
                let change = decode_entry::<WireChange>(value)
                    .and_then(|c| c.into_change_record(operation, received_at));
                out.push(label, change);
            }
        }
        Ok(out)
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Response to an upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Changes applied or already present on the receiver.
    pub processed: u64,
    /// Changes that conflicted or were rejected.
    pub conflicts: u64,
    /// Per-change rejection messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl UploadResponse {
    /// Encodes to JSON bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// One change in a download response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadChange {
    /// Record type.
    pub model: String,
    /// Record identifier.
    pub id: RecordId,
    /// Kind of mutation.
    #[serde(default = "default_operation")]
    pub operation: Operation,
    /// Field snapshot.
    #[serde(default)]
    pub data: Payload,
    /// Record version.
    #[serde(default = "default_version")]
    pub version: u64,
}

impl DownloadChange {
    /// Converts to a change record stamped with `received_at`.
    pub fn into_change_record(self, received_at: DateTime<Utc>) -> ProtocolResult<ChangeRecord> {
        if self.version == 0 {
            return Err(ProtocolError::InvalidVersion(0));
        }
        Ok(ChangeRecord {
            record_type: self.model,
            record_id: self.id,
            operation: self.operation,
            payload: self.data,
            version: self.version,
            created_at: received_at,
        })
    }
}

impl From<&ChangeRecord> for DownloadChange {
    fn from(change: &ChangeRecord) -> Self {
        Self {
            model: change.record_type.clone(),
            id: change.record_id.clone(),
            operation: change.operation,
            data: change.payload.clone(),
            version: change.version,
        }
    }
}

/// Body of the download response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadResponse {
    /// Changes since the requested timestamp, in server order.
    #[serde(default)]
    pub changes: Vec<DownloadChange>,
    /// Server-side watermark for the next `since`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_water_mark: Option<DateTime<Utc>>,
}

impl DownloadResponse {
    /// Decodes a body, converting each change on its own.
    ///
    /// Returns the decoded changes and the server watermark. Only a body
    /// that is not a download response at all fails.
    pub fn decode_changes(
        bytes: &[u8],
        received_at: DateTime<Utc>,
    ) -> ProtocolResult<(DecodedChanges, Option<DateTime<Utc>>)> {
        let raw: RawDownloadResponse = serde_json::from_slice(bytes)?;
        let mut out = DecodedChanges::default();
        for (index, value) in raw.changes.into_iter().enumerate() {
            let label = entry_label(&value, "changes", index);
            let change = decode_entry::<DownloadChange>(value)
                .and_then(|c| c.into_change_record(received_at));
            out.push(label, change);
        }
        Ok((out, raw.high_water_mark))
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Change records decoded entry by entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedChanges {
    /// Valid changes, in message order.
    pub changes: Vec<ChangeRecord>,
    /// One `"<subject>: <reason>"` message per entry that failed.
    pub rejected: Vec<String>,
}

impl DecodedChanges {
    /// Number of entries seen, valid or not.
    pub fn len(&self) -> usize {
        self.changes.len() + self.rejected.len()
    }

    /// Returns true if the message carried no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&mut self, label: String, change: ProtocolResult<ChangeRecord>) {
        match change {
            Ok(change) => self.changes.push(change),
            Err(e) => self.rejected.push(format!("{label}: {e}")),
        }
    }
}

#[derive(Deserialize)]
struct RawUploadRequest {
    #[serde(default)]
    changes: RawUploadChanges,
}

#[derive(Default, Deserialize)]
struct RawUploadChanges {
    #[serde(default)]
    create: Vec<Value>,
    #[serde(default)]
    update: Vec<Value>,
    #[serde(default)]
    delete: Vec<Value>,
}

#[derive(Deserialize)]
struct RawDownloadResponse {
    #[serde(default)]
    changes: Vec<Value>,
    #[serde(default)]
    high_water_mark: Option<DateTime<Utc>>,
}

fn decode_entry<T: DeserializeOwned>(value: Value) -> ProtocolResult<T> {
    Ok(serde_json::from_value(value)?)
}

/// `model/id` when both are readable, the entry position otherwise.
fn entry_label(value: &Value, group: &str, index: usize) -> String {
    let model = value.get("model").and_then(Value::as_str);
    let id = value.get("id").and_then(|id| match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    match (model, id) {
        (Some(model), Some(id)) => format!("{model}/{id}"),
        _ => format!("{group}[{index}]"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(id: &str, operation: Operation, version: u64) -> ChangeRecord {
        let mut payload = Payload::new();
        payload.insert("name".into(), json!(format!("item-{id}")));
        ChangeRecord::new("inventory.product", id, operation, payload, version).unwrap()
    }

    #[test]
    fn upload_groups_preserve_order() {
        let batch = vec![
            change("1", Operation::Update, 2),
            change("2", Operation::Create, 1),
            change("3", Operation::Update, 5),
            change("4", Operation::Delete, 3),
            change("5", Operation::Create, 1),
        ];

        let request = UploadRequest::from_batch(&batch);
        let ids = |ops: &[WireChange]| ops.iter().map(|c| c.id.to_string()).collect::<Vec<_>>();

        assert_eq!(ids(&request.changes.create), vec!["2", "5"]);
        assert_eq!(ids(&request.changes.update), vec!["1", "3"]);
        assert_eq!(ids(&request.changes.delete), vec!["4"]);
        assert_eq!(request.changes.len(), 5);
    }

    #[test]
    fn upload_wire_shape() {
        let request = UploadRequest::from_batch(&[change("9", Operation::Create, 1)]);
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["changes"]["create"][0]["model"], json!("inventory.product"));
        assert_eq!(value["changes"]["create"][0]["id"], json!("9"));
        assert_eq!(value["changes"]["create"][0]["version"], json!(1));
        assert_eq!(value["changes"]["update"], json!([]));
    }

    #[test]
    fn upload_accepts_partial_groups_and_integer_ids() {
        let body = br#"{"changes":{"update":[{"model":"sales.order","id":12,"data":{"total":3},"version":4}]}}"#;
        let request = UploadRequest::decode(body).unwrap();
        let decoded = request.into_changes();
        assert!(decoded.rejected.is_empty());
        let changes = decoded.changes;

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].operation, Operation::Update);
        assert_eq!(changes[0].record_id.as_str(), "12");
        assert_eq!(changes[0].version, 4);
    }

    #[test]
    fn upload_rejects_zero_version_entry_alone() {
        let body = br#"{"changes":{"create":[{"model":"m","id":"1","data":{},"version":0},{"model":"m","id":"2","data":{}}]}}"#;
        let decoded = UploadRequest::decode(body).unwrap().into_changes();
        assert_eq!(decoded.changes.len(), 1);
        assert_eq!(decoded.changes[0].record_id.as_str(), "2");
        assert_eq!(decoded.rejected.len(), 1);
        assert!(decoded.rejected[0].starts_with("m/1: invalid version 0"));
    }

    #[test]
    fn upload_body_isolates_malformed_entries() {
        let body = br#"{"changes":{
            "create":[{"model":"m","id":"1","data":{"a":1}},{"id":"2","data":{}}],
            "update":[{"model":"m","id":3,"data":"not an object"}],
            "delete":[{"model":"m","id":"4","version":2}]
        }}"#;
        let decoded = UploadRequest::decode_changes(body).unwrap();

        let ids: Vec<_> = decoded.changes.iter().map(|c| c.record_id.to_string()).collect();
        assert_eq!(ids, vec!["1", "4"]);
        assert_eq!(decoded.changes[1].operation, Operation::Delete);
        assert_eq!(decoded.len(), 4);
        assert!(decoded.rejected[0].starts_with("create[1]: json error"));
        assert!(decoded.rejected[1].starts_with("m/3: json error"));

        assert!(UploadRequest::decode_changes(b"[1, 2]").is_err());
        assert!(UploadRequest::decode_changes(br#"{"changes":{"create":{}}}"#).is_err());
    }

    #[test]
    fn download_body_isolates_malformed_entries() {
        let body = br#"{
            "changes":[
                {"model":"m","id":"1","data":{"a":1},"version":3},
                {"model":"m","id":"2","data":{},"version":0},
                {"model":"m","id":"3","operation":"merge"}
            ],
            "high_water_mark":"2024-05-01T10:00:00Z"
        }"#;
        let received_at = Utc::now();
        let (decoded, watermark) = DownloadResponse::decode_changes(body, received_at).unwrap();

        assert_eq!(decoded.changes.len(), 1);
        assert_eq!(decoded.changes[0].version, 3);
        assert_eq!(decoded.changes[0].created_at, received_at);
        assert_eq!(decoded.rejected.len(), 2);
        assert!(decoded.rejected[0].starts_with("m/2: invalid version 0"));
        assert!(decoded.rejected[1].starts_with("m/3: json error"));
        assert!(watermark.is_some());

        assert!(DownloadResponse::decode_changes(b"not json", received_at).is_err());
    }

    #[test]
    fn download_defaults() {
        let body = br#"{"changes":[{"model":"m","id":"1","data":{"a":1}}]}"#;
        let response = DownloadResponse::decode(body).unwrap();

        assert_eq!(response.changes[0].operation, Operation::Update);
        assert_eq!(response.changes[0].version, 1);
        assert!(response.high_water_mark.is_none());
    }

    #[test]
    fn upload_response_omits_empty_errors() {
        let response = UploadResponse {
            processed: 2,
            conflicts: 1,
            errors: vec![],
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value, json!({"processed": 2, "conflicts": 1}));
    }
}
