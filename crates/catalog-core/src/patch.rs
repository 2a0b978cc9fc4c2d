use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::json_type_name;
use crate::{CatalogError, DocumentKey, Result, StoredDocument};

/// One field-level operation inside a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldOp {
    /// Replace every field of the document (last write wins).
    ReplaceDocument { fields: Map<String, Value> },
    Set { field: String, value: Value },
    /// Append values missing from an array field.
    ArrayUnion { field: String, values: Vec<Value> },
    ArrayRemove { field: String, values: Vec<Value> },
    /// Write one entry of a map field, creating the map when absent.
    SetEntry {
        field: String,
        key: String,
        value: Value,
    },
    DeleteEntry { field: String, key: String },
    /// Resolved by the store to the commit time.
    ServerTimestamp { field: String },
}

impl FieldOp {
    fn apply(&self, doc: &mut Map<String, Value>, commit_time: &str) -> Result<()> {
        match self {
            FieldOp::ReplaceDocument { fields } => {
                *doc = fields.clone();
            }
            FieldOp::Set { field, value } => {
                doc.insert(field.clone(), value.clone());
            }
            FieldOp::ArrayUnion { field, values } => {
                let items = array_field(doc, field)?;
                for value in values {
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
            }
            FieldOp::ArrayRemove { field, values } => {
                let items = array_field(doc, field)?;
                items.retain(|item| !values.contains(item));
            }
            FieldOp::SetEntry { field, key, value } => {
                object_field(doc, field)?.insert(key.clone(), value.clone());
            }
            FieldOp::DeleteEntry { field, key } => {
                object_field(doc, field)?.remove(key);
            }
            FieldOp::ServerTimestamp { field } => {
                doc.insert(field.clone(), Value::String(commit_time.to_string()));
            }
        }
        Ok(())
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            FieldOp::ReplaceDocument { .. } => None,
            FieldOp::Set { field, .. }
            | FieldOp::ArrayUnion { field, .. }
            | FieldOp::ArrayRemove { field, .. }
            | FieldOp::SetEntry { field, .. }
            | FieldOp::DeleteEntry { field, .. }
            | FieldOp::ServerTimestamp { field } => Some(field),
        }
    }
}

fn array_field<'a>(doc: &'a mut Map<String, Value>, field: &str) -> Result<&'a mut Vec<Value>> {
    let slot = doc
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    match slot {
        Value::Array(items) => Ok(items),
        other => Err(CatalogError::InvalidOperation(format!(
            "field '{}' holds {}, expected array",
            field,
            json_type_name(other)
        ))),
    }
}

fn object_field<'a>(
    doc: &'a mut Map<String, Value>,
    field: &str,
) -> Result<&'a mut Map<String, Value>> {
    let slot = doc
        .entry(field.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if slot.is_null() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(entries) => Ok(entries),
        other => Err(CatalogError::InvalidOperation(format!(
            "field '{}' holds {}, expected object",
            field,
            json_type_name(other)
        ))),
    }
}

/// Guard evaluated inside the atomic commit before a patch is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "version", rename_all = "snake_case")]
pub enum Precondition {
    None,
    Exists,
    Absent,
    Version(u64),
}

impl Precondition {
    pub fn check(&self, key: &DocumentKey, current: Option<&StoredDocument>) -> Result<()> {
        match (self, current) {
            (Precondition::None, _) => Ok(()),
            (Precondition::Exists, Some(_)) => Ok(()),
            (Precondition::Exists, None) => Err(missing(key)),
            (Precondition::Absent, None) => Ok(()),
            (Precondition::Absent, Some(doc)) => Err(CatalogError::Conflict {
                key: key.to_string(),
                detail: format!("expected no document, found version {}", doc.version),
            }),
            (Precondition::Version(expected), Some(doc)) if doc.version == *expected => Ok(()),
            (Precondition::Version(expected), Some(doc)) => Err(CatalogError::Conflict {
                key: key.to_string(),
                detail: format!("expected version {}, found version {}", expected, doc.version),
            }),
            (Precondition::Version(expected), None) => Err(CatalogError::Conflict {
                key: key.to_string(),
                detail: format!("expected version {}, document is missing", expected),
            }),
        }
    }
}

fn missing(key: &DocumentKey) -> CatalogError {
    match key {
        DocumentKey::Entity { kind, id } => CatalogError::not_found(*kind, id),
        DocumentKey::Aggregate { .. } => {
            CatalogError::Commit(format!("aggregate document {} is missing", key))
        }
    }
}

/// One document-level update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub key: DocumentKey,
    pub precondition: Precondition,
    pub ops: Vec<FieldOp>,
}

impl Patch {
    pub fn new(key: DocumentKey, precondition: Precondition) -> Self {
        Self {
            key,
            precondition,
            ops: Vec::new(),
        }
    }

    pub fn with_op(mut self, op: FieldOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn apply(&self, doc: &mut Map<String, Value>, commit_time: &str) -> Result<()> {
        for op in &self.ops {
            op.apply(doc, commit_time)?;
        }
        Ok(())
    }

    pub fn touches(&self, field: &str) -> bool {
        self.ops.iter().any(|op| op.field() == Some(field))
    }
}

/// The unit the store commits all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    pub patches: Vec<Patch>,
}

impl WriteBatch {
    pub fn new(patches: Vec<Patch>) -> Self {
        Self { patches }
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub committed_at: DateTime<Utc>,
    pub documents_written: usize,
}
