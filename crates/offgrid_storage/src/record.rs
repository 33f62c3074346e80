//! Records, value envelopes and metadata queries.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Free-form metadata attached to a record.
pub type Metadata = serde_json::Map<String, Value>;

/// The value half of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StoreValue {
    /// Structured JSON value.
    Json(Value),
    /// Opaque bytes.
    Bytes(Vec<u8>),
}

impl StoreValue {
    /// Returns the JSON value, if this is one.
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            StoreValue::Json(v) => Some(v),
            StoreValue::Bytes(_) => None,
        }
    }

    /// Returns the bytes, if this is a byte value.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            StoreValue::Bytes(b) => Some(b),
            StoreValue::Json(_) => None,
        }
    }

    /// Consumes the value and returns the JSON payload, if any.
    #[must_use]
    pub fn into_json(self) -> Option<Value> {
        match self {
            StoreValue::Json(v) => Some(v),
            StoreValue::Bytes(_) => None,
        }
    }

    /// Returns the approximate encoded size, used for quota accounting.
    #[must_use]
    pub fn approximate_size(&self) -> usize {
        match self {
            StoreValue::Json(v) => v.to_string().len(),
            StoreValue::Bytes(b) => b.len(),
        }
    }
}

impl From<Value> for StoreValue {
    fn from(value: Value) -> Self {
        StoreValue::Json(value)
    }
}

impl From<Vec<u8>> for StoreValue {
    fn from(bytes: Vec<u8>) -> Self {
        StoreValue::Bytes(bytes)
    }
}

/// A record as returned to callers: logical key plus envelope contents.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRecord {
    /// Logical key (raw-key prefix stripped).
    pub key: String,
    /// Record metadata.
    pub metadata: Metadata,
    /// Record value.
    pub value: StoreValue,
}

/// The persisted form of a record: `{metadata, value}`.
///
/// Text backends store the JSON encoding, binary backends the CBOR encoding.
/// The logical key is only embedded where the backend cannot recover it
/// from the record's location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Logical key, when embedded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Record metadata.
    pub metadata: Metadata,
    /// Record value.
    pub value: StoreValue,
}

impl Envelope {
    /// Creates an envelope.
    #[must_use]
    pub fn new(metadata: Metadata, value: StoreValue) -> Self {
        Self {
            key: None,
            metadata,
            value,
        }
    }

    /// Embeds the logical key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Attaches a logical key, producing a record.
    #[must_use]
    pub fn into_record(self, key: impl Into<String>) -> StoreRecord {
        StoreRecord {
            key: key.into(),
            metadata: self.metadata,
            value: self.value,
        }
    }

    /// Encodes to a JSON string.
    pub fn to_json(&self) -> StoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes from a JSON string.
    pub fn from_json(text: &str) -> StoreResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encodes to CBOR bytes.
    pub fn to_cbor(&self) -> StoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes from CBOR bytes.
    pub fn from_cbor(bytes: &[u8]) -> StoreResult<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// What a backend can do beyond the basic key-value contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Records survive process restart.
    pub durable: bool,
    /// `find` answers structured metadata queries.
    pub query: bool,
    /// Byte values are stored natively rather than re-encoded as text.
    pub binary: bool,
}

impl Capabilities {
    /// No optional capabilities.
    pub const NONE: Capabilities = Capabilities {
        durable: false,
        query: false,
        binary: false,
    };

    /// Returns the name of the first capability in `required` that `self`
    /// lacks.
    #[must_use]
    pub fn missing(&self, required: &Capabilities) -> Option<&'static str> {
        if required.durable && !self.durable {
            Some("durable")
        } else if required.query && !self.query {
            Some("query")
        } else if required.binary && !self.binary {
            Some("binary")
        } else {
            None
        }
    }
}

/// Comparison applied to a metadata field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Field equals the value.
    Eq,
    /// Field differs from the value (or is absent).
    Ne,
    /// Field is greater than the value.
    Gt,
    /// Field is greater than or equal to the value.
    Gte,
    /// Field is less than the value.
    Lt,
    /// Field is less than or equal to the value.
    Lte,
    /// Field is present (the value is ignored).
    Exists,
    /// String field starts with the string value.
    StartsWith,
}

/// A single predicate over a dotted metadata path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dotted path into the metadata, e.g. `"owner.id"`.
    pub field: String,
    /// Comparison to apply.
    pub op: Comparison,
    /// Operand.
    #[serde(default)]
    pub value: Value,
}

/// A structured query over record metadata.
///
/// All conditions must hold. Results are ordered by logical key unless
/// `order_by` names a metadata field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Conditions, combined with AND.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Metadata field to sort by (ascending).
    #[serde(default)]
    pub order_by: Option<String>,
    /// Maximum number of records to return.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Query {
    /// Creates an empty query matching every record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a condition.
    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, op: Comparison, value: Value) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            op,
            value,
        });
        self
    }

    /// Sorts results by a metadata field.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if every condition holds for `metadata`.
    #[must_use]
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions.iter().all(|c| c.matches(metadata))
    }

    /// Sorts and truncates already-filtered records.
    pub fn finish(&self, records: &mut Vec<StoreRecord>) {
        if let Some(field) = &self.order_by {
            records.sort_by(|a, b| {
                let left = lookup(&a.metadata, field);
                let right = lookup(&b.metadata, field);
                match (left, right) {
                    (Some(l), Some(r)) => compare(l, r).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            });
        }
        if let Some(limit) = self.limit {
            records.truncate(limit);
        }
    }
}

impl Condition {
    fn matches(&self, metadata: &Metadata) -> bool {
        let field = lookup(metadata, &self.field);
        match self.op {
            Comparison::Exists => field.is_some(),
            Comparison::Eq => field == Some(&self.value),
            Comparison::Ne => field != Some(&self.value),
            Comparison::StartsWith => match (field, &self.value) {
                (Some(Value::String(s)), Value::String(prefix)) => s.starts_with(prefix.as_str()),
                _ => false,
            },
            Comparison::Gt | Comparison::Gte | Comparison::Lt | Comparison::Lte => {
                let Some(ordering) = field.and_then(|f| compare(f, &self.value)) else {
                    return false;
                };
                match self.op {
                    Comparison::Gt => ordering == Ordering::Greater,
                    Comparison::Gte => ordering != Ordering::Less,
                    Comparison::Lt => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                }
            }
        }
    }
}

fn lookup<'a>(metadata: &'a Metadata, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = metadata.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(value: Value) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn envelope_json_and_cbor() {
        let envelope = Envelope::new(
            meta(json!({"etag": "abc", "size": 3})),
            StoreValue::Json(json!({"name": "Bob"})),
        );
        let text = envelope.to_json().unwrap();
        assert_eq!(Envelope::from_json(&text).unwrap(), envelope);

        let bytes = Envelope::new(Metadata::new(), StoreValue::Bytes(vec![0, 1, 255]));
        let cbor = bytes.to_cbor().unwrap();
        assert_eq!(Envelope::from_cbor(&cbor).unwrap(), bytes);
    }

    #[test]
    fn query_conditions() {
        let m = meta(json!({"type": "user", "age": 31, "owner": {"id": "u1"}}));

        assert!(Query::new().matches(&m));
        assert!(Query::new()
            .filter("type", Comparison::Eq, json!("user"))
            .filter("age", Comparison::Gte, json!(31))
            .matches(&m));
        assert!(!Query::new().filter("age", Comparison::Gt, json!(31)).matches(&m));
        assert!(Query::new()
            .filter("owner.id", Comparison::StartsWith, json!("u"))
            .matches(&m));
        assert!(Query::new().filter("missing", Comparison::Ne, json!(1)).matches(&m));
        assert!(!Query::new()
            .filter("missing", Comparison::Exists, Value::Null)
            .matches(&m));
        // Mismatched types never compare.
        assert!(!Query::new().filter("age", Comparison::Lt, json!("40")).matches(&m));
    }

    #[test]
    fn query_order_and_limit() {
        let mut records: Vec<StoreRecord> = [3, 1, 2]
            .iter()
            .map(|n| StoreRecord {
                key: format!("k{n}"),
                metadata: meta(json!({"rank": n})),
                value: StoreValue::Json(Value::Null),
            })
            .collect();
        Query::new().order_by("rank").limit(2).finish(&mut records);
        let keys: Vec<_> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["k1", "k2"]);
    }

    #[test]
    fn missing_capability() {
        let have = Capabilities {
            durable: true,
            query: false,
            binary: true,
        };
        let need = Capabilities {
            query: true,
            ..Capabilities::NONE
        };
        assert_eq!(have.missing(&need), Some("query"));
        assert_eq!(have.missing(&Capabilities::NONE), None);
    }
}
