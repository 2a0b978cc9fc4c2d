use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::{CommitReceipt, DocumentKey, EntityId, EntityKind, Result, StoredDocument, WriteBatch};

/// Cardinality cap of one "id in set" query.
pub const DEFAULT_MAX_IDS_PER_QUERY: usize = 30;
/// Maximum number of document writes in one atomic batch.
pub const DEFAULT_MAX_BATCH_OPERATIONS: usize = 500;

/// Limits imposed by the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub max_ids_per_query: usize,
    pub max_batch_operations: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_ids_per_query: DEFAULT_MAX_IDS_PER_QUERY,
            max_batch_operations: DEFAULT_MAX_BATCH_OPERATIONS,
        }
    }
}

/// Pushed to subscribers whenever a commit changes an aggregate cache document.
#[derive(Debug, Clone)]
pub struct AggregateChange {
    pub kind: EntityKind,
    pub entries: Arc<Map<String, Value>>,
    pub committed_at: DateTime<Utc>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn limits(&self) -> StoreLimits;

    async fn get(&self, key: &DocumentKey) -> Result<Option<StoredDocument>>;

    /// Fetch entity documents whose id is in `ids`. Missing ids are omitted from
    /// the result; more than `limits().max_ids_per_query` ids is an error.
    async fn fetch_by_ids(&self, kind: EntityKind, ids: &[EntityId])
        -> Result<Vec<StoredDocument>>;

    /// Every entity document of one kind.
    async fn scan(&self, kind: EntityKind) -> Result<Vec<StoredDocument>>;

    /// Apply every patch or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt>;

    fn subscribe_aggregates(&self) -> broadcast::Receiver<AggregateChange>;
}

/// External static-page invalidation endpoint.
#[async_trait]
pub trait PageInvalidator: Send + Sync {
    async fn invalidate(&self, paths: &[String]) -> Result<()>;
}
