use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use catalog_core::{
    AggregateChange, CatalogError, CommitReceipt, DocumentKey, DocumentStore, EntityId,
    EntityKind, Result, StoreLimits, StoredDocument, WriteBatch,
};

const AGGREGATE_CHANNEL_CAPACITY: usize = 64;

/// Reference [`DocumentStore`] holding every document in memory.
///
/// Commits stage all patches against copies of the touched documents and only
/// swap them in once every precondition and operation has succeeded, so a
/// failing batch leaves the store untouched. Used by the CLI (persisted as a
/// JSON file) and by the test suites, which rely on its fault injection hooks.
pub struct MemoryStore {
    documents: RwLock<HashMap<DocumentKey, StoredDocument>>,
    limits: StoreLimits,
    aggregates: broadcast::Sender<AggregateChange>,
    queries: AtomicUsize,
    commits: AtomicUsize,
    fail_next_commit: AtomicBool,
    failing_ids: RwLock<HashSet<EntityId>>,
    commit_delay: RwLock<Option<Duration>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(StoreLimits::default())
    }
}

impl MemoryStore {
    pub fn new(limits: StoreLimits) -> Self {
        let (aggregates, _rx) = broadcast::channel(AGGREGATE_CHANNEL_CAPACITY);
        Self {
            documents: RwLock::new(HashMap::new()),
            limits,
            aggregates,
            queries: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            fail_next_commit: AtomicBool::new(false),
            failing_ids: RwLock::new(HashSet::new()),
            commit_delay: RwLock::new(None),
        }
    }

    pub fn with_documents(
        limits: StoreLimits,
        documents: impl IntoIterator<Item = StoredDocument>,
    ) -> Self {
        let store = Self::new(limits);
        for doc in documents {
            store.put_raw(doc);
        }
        store
    }

    /// Load a store persisted by [`MemoryStore::save_json`]. A missing file
    /// yields an empty store.
    pub fn load_json(path: impl AsRef<Path>, limits: StoreLimits) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No catalog data at {}, starting empty", path.display());
            return Ok(Self::new(limits));
        }
        let raw = std::fs::read_to_string(path)?;
        let documents: Vec<StoredDocument> = serde_json::from_str(&raw)?;
        info!(
            "Loaded {} documents from {}",
            documents.len(),
            path.display()
        );
        Ok(Self::with_documents(limits, documents))
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let documents = self.snapshot();
        std::fs::write(path, serde_json::to_string_pretty(&documents)?)?;
        debug!(
            "Saved {} documents to {}",
            documents.len(),
            path.display()
        );
        Ok(())
    }

    /// Insert a document as-is, bypassing commit semantics. Seeding only.
    pub fn put_raw(&self, doc: StoredDocument) {
        self.documents.write().insert(doc.key.clone(), doc);
    }

    pub fn document(&self, key: &DocumentKey) -> Option<StoredDocument> {
        self.documents.read().get(key).cloned()
    }

    /// Every document, ordered by key.
    pub fn snapshot(&self) -> Vec<StoredDocument> {
        let mut documents: Vec<StoredDocument> =
            self.documents.read().values().cloned().collect();
        documents.sort_by(|a, b| a.key.cmp(&b.key));
        documents
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Number of `fetch_by_ids` queries served so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Make every `fetch_by_ids` query that includes `id` fail.
    pub fn fail_fetches_containing(&self, id: impl Into<EntityId>) {
        self.failing_ids.write().insert(id.into());
    }

    pub fn delay_commits(&self, delay: Duration) {
        *self.commit_delay.write() = Some(delay);
    }

    fn apply(&self, batch: &WriteBatch) -> Result<(CommitReceipt, Vec<AggregateChange>)> {
        let committed_at = Utc::now();
        let stamp = committed_at.to_rfc3339_opts(SecondsFormat::Millis, true);

        let mut documents = self.documents.write();
        let mut staged: HashMap<DocumentKey, StoredDocument> = HashMap::new();
        let mut order: Vec<DocumentKey> = Vec::new();

        for patch in &batch.patches {
            if !staged.contains_key(&patch.key) {
                let current = documents.get(&patch.key);
                patch.precondition.check(&patch.key, current)?;
                let base = current
                    .cloned()
                    .unwrap_or_else(|| StoredDocument::empty(patch.key.clone()));
                staged.insert(patch.key.clone(), base);
                order.push(patch.key.clone());
            }
            if let Some(doc) = staged.get_mut(&patch.key) {
                patch.apply(&mut doc.fields, &stamp)?;
            }
        }

        let mut changes = Vec::new();
        for key in &order {
            if let Some(mut doc) = staged.remove(key) {
                doc.version += 1;
                if let DocumentKey::Aggregate { kind } = key {
                    changes.push(AggregateChange {
                        kind: *kind,
                        entries: Arc::new(doc.fields.clone()),
                        committed_at,
                    });
                }
                documents.insert(key.clone(), doc);
            }
        }

        Ok((
            CommitReceipt {
                committed_at,
                documents_written: order.len(),
            },
            changes,
        ))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn limits(&self) -> StoreLimits {
        self.limits
    }

    async fn get(&self, key: &DocumentKey) -> Result<Option<StoredDocument>> {
        Ok(self.document(key))
    }

    async fn fetch_by_ids(
        &self,
        kind: EntityKind,
        ids: &[EntityId],
    ) -> Result<Vec<StoredDocument>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if ids.len() > self.limits.max_ids_per_query {
            return Err(CatalogError::Store(format!(
                "id set of {} exceeds the per-query limit of {}",
                ids.len(),
                self.limits.max_ids_per_query
            )));
        }
        {
            let failing = self.failing_ids.read();
            if let Some(id) = ids.iter().find(|id| failing.contains(*id)) {
                return Err(CatalogError::Store(format!(
                    "injected query failure for {} {}",
                    kind, id
                )));
            }
        }

        let documents = self.documents.read();
        Ok(ids
            .iter()
            .filter_map(|id| documents.get(&DocumentKey::entity(kind, id.clone())))
            .cloned()
            .collect())
    }

    async fn scan(&self, kind: EntityKind) -> Result<Vec<StoredDocument>> {
        let mut found: Vec<StoredDocument> = self
            .documents
            .read()
            .values()
            .filter(|doc| !doc.key.is_aggregate() && doc.kind() == kind)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(found)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        let delay = *self.commit_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            warn!("Injected commit failure, {} patches discarded", batch.len());
            return Err(CatalogError::Commit("injected commit failure".to_string()));
        }

        let (receipt, changes) = self.apply(&batch)?;
        self.commits.fetch_add(1, Ordering::SeqCst);
        for change in changes {
            // No receivers is not an error for the writer.
            let _ = self.aggregates.send(change);
        }
        Ok(receipt)
    }

    fn subscribe_aggregates(&self) -> broadcast::Receiver<AggregateChange> {
        self.aggregates.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::{object_fields, FieldOp, Patch, Precondition};
    use serde_json::json;
    use tempfile::TempDir;

    fn character(id: &str) -> StoredDocument {
        StoredDocument::new(
            DocumentKey::entity(EntityKind::Character, id),
            object_fields(json!({ "name": id, "gameIds": [] })).unwrap(),
        )
    }

    fn union_game(id: &str) -> Patch {
        Patch::new(
            DocumentKey::entity(EntityKind::Character, id),
            Precondition::Exists,
        )
        .with_op(FieldOp::ArrayUnion {
            field: "gameIds".into(),
            values: vec![json!("g")],
        })
    }

    #[tokio::test]
    async fn failed_precondition_leaves_every_document_untouched() {
        let store = MemoryStore::with_documents(StoreLimits::default(), vec![character("a")]);
        let batch = WriteBatch::new(vec![union_game("a"), union_game("missing")]);

        let err = store.commit(batch).await.unwrap_err();
        assert!(err.is_not_found());
        let a = store
            .document(&DocumentKey::entity(EntityKind::Character, "a"))
            .unwrap();
        assert_eq!(a.fields["gameIds"], json!([]));
        assert_eq!(a.version, 0);
    }

    #[tokio::test]
    async fn commit_bumps_version_once_per_document() {
        let store = MemoryStore::with_documents(StoreLimits::default(), vec![character("a")]);
        let stamp = Patch::new(
            DocumentKey::entity(EntityKind::Character, "a"),
            Precondition::Version(0),
        )
        .with_op(FieldOp::ServerTimestamp {
            field: "updatedAt".into(),
        });
        let receipt = store
            .commit(WriteBatch::new(vec![union_game("a"), stamp]))
            .await
            .unwrap();

        assert_eq!(receipt.documents_written, 1);
        let a = store
            .document(&DocumentKey::entity(EntityKind::Character, "a"))
            .unwrap();
        assert_eq!(a.version, 1);
        assert!(a.str_field("updatedAt").is_some());
    }

    #[tokio::test]
    async fn oversized_id_sets_are_rejected() {
        let limits = StoreLimits {
            max_ids_per_query: 2,
            ..StoreLimits::default()
        };
        let store = MemoryStore::new(limits);
        let ids: Vec<EntityId> = ["a", "b", "c"].into_iter().map(EntityId::from).collect();
        assert!(store.fetch_by_ids(EntityKind::Character, &ids).await.is_err());
        assert_eq!(store.query_count(), 1);
    }

    #[tokio::test]
    async fn json_round_trip_preserves_documents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("catalog.json");
        let store = MemoryStore::with_documents(
            StoreLimits::default(),
            vec![character("b"), character("a")],
        );
        store.save_json(&path).unwrap();

        let reloaded = MemoryStore::load_json(&path, StoreLimits::default()).unwrap();
        assert_eq!(reloaded.snapshot(), store.snapshot());
        assert!(MemoryStore::load_json(dir.path().join("absent.json"), StoreLimits::default())
            .unwrap()
            .is_empty());
    }
}
