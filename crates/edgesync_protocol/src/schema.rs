//! Static schema registry for sync-enabled record types.
//!
//! Every record type that participates in sync is declared here with an
//! ordered list of fields and a decoder per field. Incoming payloads are
//! decoded field by field; fields the schema does not declare are rejected
//! rather than silently set.

use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::{Payload, RecordId};
use chrono::DateTime;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Decodes one field value, returning the canonical value or a reason.
pub type FieldDecoder = fn(&Value) -> Result<Value, String>;

/// Built-in field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// UTF-8 string.
    Text,
    /// Signed or unsigned integer (numeric strings accepted).
    Integer,
    /// Any JSON number (numeric strings accepted).
    Number,
    /// Boolean.
    Boolean,
    /// RFC 3339 timestamp, normalised to UTC.
    Timestamp,
    /// Foreign key, carried as the referenced record's identifier.
    Reference,
    /// Arbitrary JSON, passed through.
    Json,
}

impl FieldKind {
    /// Returns the decoder for this kind.
    pub fn decoder(&self) -> FieldDecoder {
        match self {
            FieldKind::Text => decode_text,
            FieldKind::Integer => decode_integer,
            FieldKind::Number => decode_number,
            FieldKind::Boolean => decode_boolean,
            FieldKind::Timestamp => decode_timestamp,
            FieldKind::Reference => decode_reference,
            FieldKind::Json => decode_json,
        }
    }
}

impl FromStr for FieldKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" | "string" => Ok(FieldKind::Text),
            "integer" | "int" => Ok(FieldKind::Integer),
            "number" | "decimal" | "float" => Ok(FieldKind::Number),
            "boolean" | "bool" => Ok(FieldKind::Boolean),
            "timestamp" | "datetime" => Ok(FieldKind::Timestamp),
            "reference" | "foreign_key" => Ok(FieldKind::Reference),
            "json" => Ok(FieldKind::Json),
            other => Err(ProtocolError::UnknownFieldKind(other.to_string())),
        }
    }
}

fn decode_text(value: &Value) -> Result<Value, String> {
    match value {
        Value::String(_) => Ok(value.clone()),
        other => Err(format!("expected text, got {other}")),
    }
}

fn decode_integer(value: &Value) -> Result<Value, String> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| format!("expected integer, got {s:?}: {e}")),
        other => Err(format!("expected integer, got {other}")),
    }
}

fn decode_number(value: &Value) -> Result<Value, String> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("expected number, got {s:?}")),
        other => Err(format!("expected number, got {other}")),
    }
}

fn decode_boolean(value: &Value) -> Result<Value, String> {
    match value {
        Value::Bool(_) => Ok(value.clone()),
        other => Err(format!("expected boolean, got {other}")),
    }
}

fn decode_timestamp(value: &Value) -> Result<Value, String> {
    let text = value
        .as_str()
        .ok_or_else(|| format!("expected timestamp string, got {value}"))?;
    let parsed = DateTime::parse_from_rfc3339(text)
        .map_err(|e| format!("invalid timestamp {text:?}: {e}"))?;
    Ok(Value::String(
        parsed.with_timezone(&chrono::Utc).to_rfc3339(),
    ))
}

fn decode_reference(value: &Value) -> Result<Value, String> {
    match value {
        Value::String(_) => Ok(value.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Value::String(n.to_string())),
        other => Err(format!("expected reference id, got {other}")),
    }
}

fn decode_json(value: &Value) -> Result<Value, String> {
    Ok(value.clone())
}

/// A declared field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Decoder applied to incoming values.
    pub decode: FieldDecoder,
    /// Whether `null` is accepted.
    pub nullable: bool,
}

/// Declared fields of one record type, in declaration order.
#[derive(Debug, Clone)]
pub struct RecordSchema {
    record_type: String,
    fields: Vec<FieldSpec>,
}

impl RecordSchema {
    /// Creates an empty schema for a record type.
    pub fn new(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a non-nullable field of a built-in kind.
    pub fn field(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.custom_field(name, kind.decoder(), false)
    }

    /// Adds a nullable field of a built-in kind.
    pub fn nullable_field(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.custom_field(name, kind.decoder(), true)
    }

    /// Adds a field with a custom decoder.
    pub fn custom_field(
        mut self,
        name: impl Into<String>,
        decode: FieldDecoder,
        nullable: bool,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            decode,
            nullable,
        });
        self
    }

    /// Returns the record type.
    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// Returns the declared fields.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Looks up a field by name.
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Decodes an incoming payload.
    ///
    /// Unknown fields are rejected. Fields absent from the payload are
    /// absent from the result, so applying it overwrites only what was sent.
    pub fn decode(&self, payload: &Payload) -> ProtocolResult<Payload> {
        if let Some(unknown) = payload.keys().find(|k| self.get(k).is_none()) {
            return Err(ProtocolError::UnknownField {
                record_type: self.record_type.clone(),
                field: unknown.clone(),
            });
        }

        let mut decoded = Payload::new();
        for field in &self.fields {
            let Some(value) = payload.get(&field.name) else {
                continue;
            };
            let value = if value.is_null() {
                if !field.nullable {
                    return Err(self.invalid(&field.name, "null is not allowed".into()));
                }
                Value::Null
            } else {
                (field.decode)(value).map_err(|reason| self.invalid(&field.name, reason))?
            };
            decoded.insert(field.name.clone(), value);
        }
        Ok(decoded)
    }

    fn invalid(&self, field: &str, reason: String) -> ProtocolError {
        ProtocolError::InvalidField {
            record_type: self.record_type.clone(),
            field: field.to_string(),
            reason,
        }
    }
}

/// A typed domain record that opts in to sync.
pub trait SyncParticipant {
    /// Record type name, e.g. `inventory.product`.
    const RECORD_TYPE: &'static str;

    /// Unique identifier of this record.
    fn record_id(&self) -> RecordId;

    /// Field snapshot, excluding sync metadata. Foreign keys are
    /// represented by the referenced identifier.
    fn sync_data(&self) -> Payload;

    /// Declared fields of this record type.
    fn schema() -> RecordSchema;
}

/// Registry mapping record types to their schemas.
///
/// The engine only ever operates on record types declared here.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, RecordSchema>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema, replacing any previous one for the same type.
    pub fn register(mut self, schema: RecordSchema) -> Self {
        self.schemas.insert(schema.record_type.clone(), schema);
        self
    }

    /// Registers a typed participant.
    pub fn register_participant<T: SyncParticipant>(self) -> Self {
        self.register(T::schema())
    }

    /// Returns the schema of a record type.
    pub fn get(&self, record_type: &str) -> ProtocolResult<&RecordSchema> {
        self.schemas
            .get(record_type)
            .ok_or_else(|| ProtocolError::UnknownRecordType(record_type.to_string()))
    }

    /// Returns true if the record type is registered.
    pub fn contains(&self, record_type: &str) -> bool {
        self.schemas.contains_key(record_type)
    }

    /// Registered record types, sorted.
    pub fn record_types(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    /// Decodes a payload for a record type.
    pub fn decode(&self, record_type: &str, payload: &Payload) -> ProtocolResult<Payload> {
        self.get(record_type)?.decode(payload)
    }
}
