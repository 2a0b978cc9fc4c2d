use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::{CatalogError, EntityId, EntityKind, Result, Summary};

/// Address of one document in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentKey {
    Entity { kind: EntityKind, id: EntityId },
    /// Singleton id -> summary map for one entity kind.
    Aggregate { kind: EntityKind },
}

impl DocumentKey {
    pub fn entity(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        DocumentKey::Entity {
            kind,
            id: id.into(),
        }
    }

    pub fn aggregate(kind: EntityKind) -> Self {
        DocumentKey::Aggregate { kind }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            DocumentKey::Entity { kind, .. } | DocumentKey::Aggregate { kind } => *kind,
        }
    }

    pub fn entity_id(&self) -> Option<&EntityId> {
        match self {
            DocumentKey::Entity { id, .. } => Some(id),
            DocumentKey::Aggregate { .. } => None,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, DocumentKey::Aggregate { .. })
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKey::Entity { kind, id } => write!(f, "{}/{}", kind.collection(), id),
            DocumentKey::Aggregate { kind } => write!(f, "aggregates/{}", kind.collection()),
        }
    }
}

/// A document as held by the store: schemaless fields plus the store's
/// per-document version counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub key: DocumentKey,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl StoredDocument {
    pub fn new(key: DocumentKey, fields: Map<String, Value>) -> Self {
        Self {
            key,
            version: 0,
            fields,
        }
    }

    pub fn empty(key: DocumentKey) -> Self {
        Self::new(key, Map::new())
    }

    pub fn kind(&self) -> EntityKind {
        self.key.kind()
    }

    pub fn id_list(&self, field: &str) -> Vec<EntityId> {
        read_id_list(&self.fields, field)
    }

    pub fn cache(&self, field: &str) -> BTreeMap<EntityId, Summary> {
        read_cache(&self.fields, field)
    }

    pub fn summary(&self) -> Summary {
        project_summary(self.kind(), &self.fields)
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

/// Reads a relation id list. Absent or null fields are an empty list; non-string
/// entries are skipped.
pub fn read_id_list(fields: &Map<String, Value>, field: &str) -> Vec<EntityId> {
    match fields.get(field) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(EntityId::from)
            .collect(),
        _ => Vec::new(),
    }
}

pub fn read_cache(fields: &Map<String, Value>, field: &str) -> BTreeMap<EntityId, Summary> {
    let mut cache = BTreeMap::new();
    if let Some(Value::Object(entries)) = fields.get(field) {
        for (id, entry) in entries {
            if let Value::Object(summary) = entry {
                cache.insert(
                    EntityId::from(id.as_str()),
                    summary.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                );
            }
        }
    }
    cache
}

/// Projects exactly the kind's summary fields; missing fields project as null so
/// every summary of a kind has the same shape.
pub fn project_summary(kind: EntityKind, fields: &Map<String, Value>) -> Summary {
    kind.summary_fields()
        .iter()
        .map(|name| {
            (
                (*name).to_string(),
                fields.get(*name).cloned().unwrap_or(Value::Null),
            )
        })
        .collect()
}

pub fn summary_to_value(summary: &Summary) -> Value {
    Value::Object(
        summary
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

pub fn ids_to_value(ids: &[EntityId]) -> Value {
    Value::Array(
        ids.iter()
            .map(|id| Value::String(id.as_str().to_string()))
            .collect(),
    )
}

/// Decodes a JSON object into a field map, rejecting any other JSON type.
pub fn object_fields(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(CatalogError::InvalidOperation(format!(
            "expected a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
