//! Core types shared by the adapter and its collaborators.

use crate::error::{AdapterError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// Record identifier as the backend hands it out.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Int(i64),
    Str(String),
}

impl Identifier {
    /// Read an identifier out of a JSON value. Only integers and strings qualify.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Identifier::Int),
            Value::String(s) => Some(Identifier::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Identifier::Int(i) => Value::from(*i),
            Identifier::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Int(i) => write!(f, "{}", i),
            Identifier::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Identifier {
    fn from(id: i64) -> Self {
        Identifier::Int(id)
    }
}

impl From<i32> for Identifier {
    fn from(id: i32) -> Self {
        Identifier::Int(i64::from(id))
    }
}

impl From<&str> for Identifier {
    fn from(id: &str) -> Self {
        Identifier::Str(id.to_string())
    }
}

impl From<String> for Identifier {
    fn from(id: String) -> Self {
        Identifier::Str(id)
    }
}

/// Field holding a record's identifier.
pub const ID_FIELD: &str = "id";

/// A serialized record: a JSON object whose identifier lives under `id`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value. Anything other than an object is rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Record(map)),
            other => Err(AdapterError::Serialization(format!(
                "record must be a JSON object, got {}",
                other
            ))),
        }
    }

    pub fn id(&self) -> Option<Identifier> {
        self.0.get(ID_FIELD).and_then(Identifier::from_value)
    }

    pub fn set_id(&mut self, id: &Identifier) {
        self.0.insert(ID_FIELD.to_string(), id.to_value());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Opaque query descriptor. The adapter forwards it and fingerprints it,
/// nothing more.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query(Value);

impl Query {
    pub fn new(value: Value) -> Self {
        Query(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Stable key for deduplicating subscriptions.
    ///
    /// Object keys are sorted at every level before hashing, so two queries
    /// that differ only in key order hash the same.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(canonicalize(&self.0).to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Top-level field equality against a record.
    ///
    /// Only the in-memory collaborators interpret queries this way; a
    /// non-object query matches everything.
    pub fn matches(&self, record: &Record) -> bool {
        match &self.0 {
            Value::Object(fields) => fields
                .iter()
                .all(|(field, expected)| record.get(field) == Some(expected)),
            _ => true,
        }
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut sorted: Vec<_> = fields.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(field, inner)| (field.clone(), canonicalize(inner)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Result of a backend call, handed back to the caller of a verb.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Record(Record),
    Records(Vec<Record>),
    Empty,
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Record(_) => false,
            Payload::Records(records) => records.is_empty(),
            Payload::Empty => true,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Payload::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            Payload::Record(record) => vec![record],
            Payload::Records(records) => records,
            Payload::Empty => Vec::new(),
        }
    }
}

/// Which verb a request descriptor was built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    FindRecord,
    FindAll,
    FindMany,
    Query,
    QueryRecord,
    CreateRecord,
    UpdateRecord,
    DeleteRecord,
    Watch,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::FindRecord => "find_record",
            OperationKind::FindAll => "find_all",
            OperationKind::FindMany => "find_many",
            OperationKind::Query => "query",
            OperationKind::QueryRecord => "query_record",
            OperationKind::CreateRecord => "create_record",
            OperationKind::UpdateRecord => "update_record",
            OperationKind::DeleteRecord => "delete_record",
            OperationKind::Watch => "watch",
        }
    }

    /// Read verbs may be followed by watch establishment.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            OperationKind::FindRecord
                | OperationKind::FindAll
                | OperationKind::FindMany
                | OperationKind::Query
                | OperationKind::QueryRecord
        )
    }

    /// Reads whose answer is every record matching their key: the whole
    /// collection, or the whole query result.
    pub fn is_full_read(&self) -> bool {
        matches!(self, OperationKind::FindAll | OperationKind::Query)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call description of what the caller asked for.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
    pub model: String,
    pub kind: OperationKind,
    pub id: Option<Identifier>,
    pub ids: Option<Vec<Identifier>>,
    pub query: Option<Query>,
    pub payload: Option<Record>,
}

impl RequestDescriptor {
    fn bare(model: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            model: model.into(),
            kind,
            id: None,
            ids: None,
            query: None,
            payload: None,
        }
    }

    pub fn find_record(model: impl Into<String>, id: Identifier) -> Self {
        Self {
            id: Some(id),
            ..Self::bare(model, OperationKind::FindRecord)
        }
    }

    pub fn find_all(model: impl Into<String>) -> Self {
        Self::bare(model, OperationKind::FindAll)
    }

    pub fn find_many(model: impl Into<String>, ids: Vec<Identifier>) -> Self {
        Self {
            ids: Some(ids),
            ..Self::bare(model, OperationKind::FindMany)
        }
    }

    pub fn query(model: impl Into<String>, query: Query) -> Self {
        Self {
            query: Some(query),
            ..Self::bare(model, OperationKind::Query)
        }
    }

    pub fn query_record(model: impl Into<String>, query: Query) -> Self {
        Self {
            query: Some(query),
            ..Self::bare(model, OperationKind::QueryRecord)
        }
    }

    pub fn create_record(model: impl Into<String>, payload: Record) -> Self {
        Self {
            payload: Some(payload),
            ..Self::bare(model, OperationKind::CreateRecord)
        }
    }

    /// The identifier is taken from the payload.
    pub fn update_record(model: impl Into<String>, payload: Record) -> Self {
        Self {
            id: payload.id(),
            payload: Some(payload),
            ..Self::bare(model, OperationKind::UpdateRecord)
        }
    }

    pub fn delete_record(model: impl Into<String>, id: Identifier) -> Self {
        Self {
            id: Some(id),
            ..Self::bare(model, OperationKind::DeleteRecord)
        }
    }

    /// Descriptor for a standing watch over this request's model and query.
    pub fn for_watch(&self) -> Self {
        Self {
            query: self.query.clone(),
            ..Self::bare(self.model.clone(), OperationKind::Watch)
        }
    }

    pub fn watch_key(&self) -> WatchKey {
        WatchKey::new(self.model.clone(), self.query.as_ref())
    }
}

/// Registry key: one logical collection, optionally narrowed by a query.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchKey {
    pub model: String,
    pub fingerprint: Option<String>,
}

impl WatchKey {
    pub fn new(model: impl Into<String>, query: Option<&Query>) -> Self {
        Self {
            model: model.into(),
            fingerprint: query.map(Query::fingerprint),
        }
    }

    pub fn collection(model: impl Into<String>) -> Self {
        Self::new(model, None)
    }
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.fingerprint {
            Some(fp) => write!(f, "{}#{}", self.model, &fp[..fp.len().min(12)]),
            None => f.write_str(&self.model),
        }
    }
}

/// What happened to a record on the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Inserted,
    Updated,
    Removed,
}

/// A change pushed by the backend for an active watch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub record: Record,
}

impl ChangeEvent {
    pub fn inserted(record: Record) -> Self {
        Self {
            kind: ChangeKind::Inserted,
            record,
        }
    }

    pub fn updated(record: Record) -> Self {
        Self {
            kind: ChangeKind::Updated,
            record,
        }
    }

    pub fn removed(record: Record) -> Self {
        Self {
            kind: ChangeKind::Removed,
            record,
        }
    }
}
