#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;

use catalog_cache::{CategoryTable, InvalidationNotifier};
use catalog_core::{
    object_fields, AuthContext, DocumentKey, EntityId, EntityKind, InvalidationConfig,
    PageInvalidator, Permission, Result, Settings, StoreLimits, StoredDocument,
};
use catalog_graph::{managed_fields, CatalogService, EditInput, MemoryStore};

/// Records every invalidation request and always succeeds.
#[derive(Default)]
pub struct RecordingInvalidator {
    pub requests: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl PageInvalidator for RecordingInvalidator {
    async fn invalidate(&self, paths: &[String]) -> Result<()> {
        self.requests.lock().push(paths.to_vec());
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub service: CatalogService<MemoryStore>,
    pub invalidator: Arc<RecordingInvalidator>,
    pub admin: AuthContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::default(), Settings::default())
    }

    pub fn with_limits(limits: StoreLimits) -> Self {
        Self::with_store(MemoryStore::new(limits), Settings::default())
    }

    pub fn with_store(store: MemoryStore, settings: Settings) -> Self {
        let store = Arc::new(store);
        let invalidator = Arc::new(RecordingInvalidator::default());
        let categories = CategoryTable::from_settings(&InvalidationConfig::default());
        let service = CatalogService::new(store.clone(), &settings)
            .unwrap()
            .with_notifier(InvalidationNotifier::new(invalidator.clone(), categories, 3));
        Self {
            store,
            service,
            invalidator,
            admin: AuthContext::admin("ops@falcom.test"),
        }
    }

    pub fn doc(&self, kind: EntityKind, id: &str) -> StoredDocument {
        self.store
            .document(&DocumentKey::entity(kind, id))
            .unwrap_or_else(|| panic!("{} {} missing", kind, id))
    }

    pub fn aggregate(&self, kind: EntityKind) -> Map<String, Value> {
        self.store
            .document(&DocumentKey::aggregate(kind))
            .map(|doc| doc.fields)
            .unwrap_or_default()
    }

    pub async fn create(&self, kind: EntityKind, id: &str, fields: Value, relations: &[(&str, &[&str])]) {
        let mut input = EditInput::create(kind, id, object_fields(fields).unwrap());
        for (field, ids) in relations {
            input = input.with_relation(field, ids_of(ids));
        }
        let outcome = self.service.edit(&self.admin, input).await.unwrap();
        catalog_graph::await_notification(outcome.notification).await;
    }

    /// An update input that keeps every current relation and authoritative
    /// field, ready for the caller to change.
    pub fn update_input(&self, kind: EntityKind, id: &str) -> EditInput {
        let snapshot = self.doc(kind, id);
        let fields = editable_fields(&snapshot);
        EditInput::update(snapshot, fields).unwrap()
    }
}

pub fn editable_fields(doc: &StoredDocument) -> Map<String, Value> {
    let managed = managed_fields(doc.kind());
    doc.fields
        .iter()
        .filter(|(name, _)| !managed.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

pub fn ids_of(ids: &[&str]) -> Vec<EntityId> {
    ids.iter().map(|id| EntityId::from(*id)).collect()
}

pub fn editor_only() -> AuthContext {
    AuthContext {
        subject: "editor@falcom.test".to_string(),
        permissions: vec![Permission::ReadCatalog, Permission::EditCatalog],
        expires_at: None,
    }
}

pub fn character(name: &str) -> Value {
    serde_json::json!({
        "name": name,
        "category": "Ys Series",
        "hasAvatarImage": true,
        "description": format!("{} of the Ys series", name),
    })
}

pub fn game(name: &str, category: &str) -> Value {
    serde_json::json!({
        "name": name,
        "category": category,
        "releaseDate": "2006-12-21",
        "hasCoverImage": true,
    })
}

pub fn track(name: &str, duration: u64) -> Value {
    serde_json::json!({
        "name": name,
        "category": "Ys Series",
        "durationSeconds": duration,
    })
}

pub fn staff(name: &str) -> Value {
    serde_json::json!({
        "name": name,
        "category": "Composer",
        "hasAvatarImage": false,
    })
}

/// Seeds a plain track document directly, bypassing the engine.
pub fn seed_track(store: &MemoryStore, id: &str, name: &str) {
    store.put_raw(StoredDocument::new(
        DocumentKey::entity(EntityKind::MusicTrack, id),
        object_fields(track(name, 180)).unwrap(),
    ));
}
