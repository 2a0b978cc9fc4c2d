//! Recomputes embedded caches from authoritative entity fields.
//!
//! Edits keep caches consistent only along edges whose partner side records
//! the reference. A track retitle cannot reach the staff members crediting it,
//! so their `cachedMusic` entries drift until an operator rebuilds them here.

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use catalog_core::{
    fields, summary_to_value, AuthContext, CatalogError, CommitReceipt, DocumentKey,
    DocumentStore, EntityId, EntityKind, FieldOp, Patch, Permission, Precondition, Result,
    WriteBatch,
};

use crate::chunked::{dedup, ChunkedQueryExecutor};
use crate::relation::sides_for;
use crate::writer::BatchWriter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheFieldReport {
    pub field: &'static str,
    pub partner: EntityKind,
    /// Entries written, one per referenced id.
    pub entries: usize,
    /// Stale entries whose id is no longer referenced.
    pub dropped: usize,
    /// Entries that were missing or differed from the partner's summary.
    pub refreshed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub kind: EntityKind,
    pub id: EntityId,
    pub fields: Vec<CacheFieldReport>,
    pub receipt: CommitReceipt,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateRebuildReport {
    pub kind: EntityKind,
    pub entries: usize,
    pub receipt: CommitReceipt,
}

pub struct CacheRebuilder<S: ?Sized> {
    store: Arc<S>,
    executor: ChunkedQueryExecutor<S>,
    writer: BatchWriter<S>,
}

impl<S> CacheRebuilder<S>
where
    S: DocumentStore + ?Sized,
{
    pub fn new(store: Arc<S>, commit_timeout: Duration) -> Self {
        Self {
            executor: ChunkedQueryExecutor::new(store.clone()),
            writer: BatchWriter::new(store.clone(), commit_timeout),
            store,
        }
    }

    /// Overwrite every cache field of one entity with its partners' current
    /// summaries. Fails closed when any referenced partner is missing.
    pub async fn rebuild(
        &self,
        auth: &AuthContext,
        kind: EntityKind,
        id: &EntityId,
    ) -> Result<RebuildReport> {
        auth.require(Permission::EditCatalog)?;

        let sides: Vec<_> = sides_for(kind)
            .into_iter()
            .filter(|side| side.cache_field.is_some())
            .collect();
        if sides.is_empty() {
            return Err(CatalogError::InvalidOperation(format!(
                "{} documents carry no cache fields",
                kind
            )));
        }

        let key = DocumentKey::entity(kind, id.clone());
        let doc = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| CatalogError::not_found(kind, id))?;

        let mut patch = Patch::new(key, Precondition::Version(doc.version));
        let mut reports = Vec::with_capacity(sides.len());

        for side in sides {
            let Some(cache_field) = side.cache_field else {
                continue;
            };
            let ids = dedup(&doc.id_list(side.ids_field));
            let resolved = self.executor.resolve(side.partner, &ids).await?;
            let previous = doc.cache(cache_field);

            let mut cache = Map::new();
            let mut refreshed = 0;
            for id in &ids {
                let Some(partner) = resolved.get(id) else {
                    return Err(CatalogError::not_found(side.partner, id));
                };
                let summary = partner.summary();
                if previous.get(id) != Some(&summary) {
                    refreshed += 1;
                }
                cache.insert(id.as_str().to_string(), summary_to_value(&summary));
            }
            let dropped = previous.keys().filter(|id| !ids.contains(*id)).count();

            reports.push(CacheFieldReport {
                field: cache_field,
                partner: side.partner,
                entries: cache.len(),
                dropped,
                refreshed,
            });
            patch.ops.push(FieldOp::Set {
                field: cache_field.to_string(),
                value: Value::Object(cache),
            });
        }
        patch.ops.push(FieldOp::ServerTimestamp {
            field: fields::UPDATED_AT.to_string(),
        });

        let receipt = self.writer.commit_batch(WriteBatch::new(vec![patch])).await?;
        for report in &reports {
            if report.dropped > 0 || report.refreshed > 0 {
                warn!(
                    kind = %kind,
                    id = %id,
                    field = report.field,
                    dropped = report.dropped,
                    refreshed = report.refreshed,
                    "repaired drifted cache"
                );
            }
        }
        info!(kind = %kind, id = %id, "rebuilt entity caches");

        Ok(RebuildReport {
            kind,
            id: id.clone(),
            fields: reports,
            receipt,
        })
    }

    /// Rescan every entity of `kind` and replace its aggregate cache document.
    pub async fn rebuild_aggregate(
        &self,
        auth: &AuthContext,
        kind: EntityKind,
    ) -> Result<AggregateRebuildReport> {
        auth.require(Permission::EditCatalog)?;

        let entities = self.store.scan(kind).await?;
        let mut entries = Map::new();
        for doc in &entities {
            if let Some(id) = doc.key.entity_id() {
                entries.insert(id.as_str().to_string(), summary_to_value(&doc.summary()));
            }
        }
        let count = entries.len();

        let patch = Patch::new(DocumentKey::aggregate(kind), Precondition::None)
            .with_op(FieldOp::ReplaceDocument { fields: entries });
        let receipt = self.writer.commit_batch(WriteBatch::new(vec![patch])).await?;
        info!(kind = %kind, entries = count, "rebuilt aggregate cache");

        Ok(AggregateRebuildReport {
            kind,
            entries: count,
            receipt,
        })
    }
}
