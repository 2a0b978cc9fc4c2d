use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use catalog_cache::{detail_path, InvalidationNotifier, NotificationOutcome};
use catalog_core::{
    AuthContext, CatalogError, CommitReceipt, DocumentKey, DocumentStore, EntityId, EntityKind,
    Permission, Result, Settings, StoredDocument,
};

use crate::chunked::ChunkedQueryExecutor;
use crate::planner::{EditInput, MutationPlanner, RelationDiff};
use crate::rebuild::{AggregateRebuildReport, CacheRebuilder, RebuildReport};
use crate::writer::BatchWriter;

/// Result of a committed edit. The notification runs in the background and
/// may still be in flight.
pub struct EditOutcome {
    pub kind: EntityKind,
    pub id: EntityId,
    pub patches: usize,
    pub summary_changed: bool,
    pub diffs: Vec<RelationDiff>,
    pub receipt: CommitReceipt,
    pub invalidated_paths: Vec<String>,
    pub notification: Option<JoinHandle<NotificationOutcome>>,
}

pub struct RebuildOutcome {
    pub report: RebuildReport,
    pub invalidated_paths: Vec<String>,
    pub notification: Option<JoinHandle<NotificationOutcome>>,
}

/// Waits for a spawned notification. A panicked task counts as a failed
/// delivery.
pub async fn await_notification(
    handle: Option<JoinHandle<NotificationOutcome>>,
) -> NotificationOutcome {
    match handle {
        None => NotificationOutcome::Skipped,
        Some(handle) => handle.await.unwrap_or_else(|e| NotificationOutcome::Failed {
            attempts: 0,
            last_error: e.to_string(),
        }),
    }
}

/// Entry point for edits and repairs: authorization, planning, commit and
/// page invalidation in one place.
pub struct CatalogService<S: ?Sized> {
    store: Arc<S>,
    planner: MutationPlanner,
    executor: ChunkedQueryExecutor<S>,
    writer: BatchWriter<S>,
    rebuilder: CacheRebuilder<S>,
    notifier: Arc<InvalidationNotifier>,
}

impl<S> CatalogService<S>
where
    S: DocumentStore + ?Sized,
{
    pub fn new(store: Arc<S>, settings: &Settings) -> Result<Self> {
        let commit_timeout = settings.store.commit_timeout();
        Ok(Self {
            planner: MutationPlanner::new(settings.engine.optimistic_concurrency),
            executor: ChunkedQueryExecutor::new(store.clone()),
            writer: BatchWriter::new(store.clone(), commit_timeout),
            rebuilder: CacheRebuilder::new(store.clone(), commit_timeout),
            notifier: Arc::new(InvalidationNotifier::from_settings(&settings.invalidation)?),
            store,
        })
    }

    pub fn with_notifier(mut self, notifier: InvalidationNotifier) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn load(
        &self,
        auth: &AuthContext,
        kind: EntityKind,
        id: &EntityId,
    ) -> Result<StoredDocument> {
        auth.require(Permission::ReadCatalog)?;
        self.store
            .get(&DocumentKey::entity(kind, id.clone()))
            .await?
            .ok_or_else(|| CatalogError::not_found(kind, id))
    }

    pub async fn edit(&self, auth: &AuthContext, input: EditInput) -> Result<EditOutcome> {
        auth.require(Permission::EditCatalog)?;

        let lookups = self.planner.required_lookups(&input)?;
        let known = self.executor.resolve_summaries(&lookups).await?;
        let plan = self.planner.plan(&input, &known)?;
        let receipt = self.writer.commit(&plan).await?;

        let invalidated_paths = self.notifier.paths_for(&plan.affected_pages());
        info!(
            kind = %plan.kind,
            id = %plan.id,
            patches = plan.len(),
            summary_changed = plan.summary_changed,
            subject = %auth.subject,
            "edit committed"
        );

        let notification = self.notify(&invalidated_paths);
        Ok(EditOutcome {
            kind: plan.kind,
            id: plan.id,
            patches: plan.patches.len(),
            summary_changed: plan.summary_changed,
            diffs: plan.diffs,
            receipt,
            invalidated_paths,
            notification,
        })
    }

    pub async fn rebuild(
        &self,
        auth: &AuthContext,
        kind: EntityKind,
        id: &EntityId,
    ) -> Result<RebuildOutcome> {
        let report = self.rebuilder.rebuild(auth, kind, id).await?;
        let invalidated_paths = vec![detail_path(kind, id)];
        let notification = self.notify(&invalidated_paths);
        Ok(RebuildOutcome {
            report,
            invalidated_paths,
            notification,
        })
    }

    pub async fn rebuild_aggregate(
        &self,
        auth: &AuthContext,
        kind: EntityKind,
    ) -> Result<AggregateRebuildReport> {
        self.rebuilder.rebuild_aggregate(auth, kind).await
    }

    fn notify(&self, paths: &[String]) -> Option<JoinHandle<NotificationOutcome>> {
        if !self.notifier.is_enabled() {
            return None;
        }
        Some(self.notifier.spawn(paths.to_vec()))
    }
}
