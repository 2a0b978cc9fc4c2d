use futures::future::try_join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use catalog_core::{CatalogError, DocumentStore, EntityId, EntityKind, Result, StoredDocument};

use crate::planner::{LookupSet, SummaryIndex};

/// Resolves id sets larger than the store's "id in set" cap by fanning out one
/// query per chunk.
pub struct ChunkedQueryExecutor<S: ?Sized> {
    store: Arc<S>,
    chunk_size: usize,
}

impl<S> ChunkedQueryExecutor<S>
where
    S: DocumentStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        let chunk_size = store.limits().max_ids_per_query.max(1);
        Self { store, chunk_size }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Fetch every document in `ids`. Fails with `EntityNotFound` when any id is
    /// missing and with `Resolution` when any chunk query fails.
    pub async fn resolve(
        &self,
        kind: EntityKind,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, StoredDocument>> {
        let ids = dedup(ids);
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let chunks = partition(&ids, self.chunk_size);
        let total = chunks.len();
        debug!(
            kind = %kind,
            ids = ids.len(),
            chunks = total,
            "resolving id set in chunks"
        );

        let queries = chunks.iter().enumerate().map(|(index, chunk)| async move {
            self.store.fetch_by_ids(kind, chunk).await.map_err(|e| {
                CatalogError::Resolution(format!(
                    "{} chunk {}/{} ({} ids) failed: {}",
                    kind,
                    index + 1,
                    total,
                    chunk.len(),
                    e
                ))
            })
        });
        let results = try_join_all(queries).await?;

        let mut resolved = HashMap::with_capacity(ids.len());
        for doc in results.into_iter().flatten() {
            if let Some(id) = doc.key.entity_id() {
                resolved.insert(id.clone(), doc);
            }
        }

        if let Some(missing) = ids.iter().find(|id| !resolved.contains_key(*id)) {
            return Err(CatalogError::not_found(kind, missing));
        }
        Ok(resolved)
    }

    /// Resolve every lookup into summaries, one kind at a time concurrently.
    pub async fn resolve_summaries(&self, lookups: &LookupSet) -> Result<SummaryIndex> {
        let per_kind = try_join_all(
            lookups
                .iter()
                .map(|(kind, ids)| async move { self.resolve(*kind, ids).await }),
        )
        .await?;

        let mut index = SummaryIndex::default();
        for docs in per_kind {
            for doc in docs.into_values() {
                index.insert_document(&doc);
            }
        }
        Ok(index)
    }
}

/// Split `ids` into ordered chunks of at most `chunk_size`.
pub fn partition(ids: &[EntityId], chunk_size: usize) -> Vec<Vec<EntityId>> {
    ids.chunks(chunk_size.max(1)).map(<[EntityId]>::to_vec).collect()
}

/// Drop repeated ids, keeping first-occurrence order.
pub(crate) fn dedup(ids: &[EntityId]) -> Vec<EntityId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter()
        .filter(|id| seen.insert(*id))
        .cloned()
        .collect()
}
