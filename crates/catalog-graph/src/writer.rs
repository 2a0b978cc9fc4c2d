use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info};

use catalog_core::{CatalogError, CommitReceipt, DocumentStore, Result, WriteBatch};

use crate::planner::MutationPlan;

/// Commits a plan's patches as one all-or-nothing batch.
pub struct BatchWriter<S: ?Sized> {
    store: Arc<S>,
    commit_timeout: Duration,
}

impl<S> BatchWriter<S>
where
    S: DocumentStore + ?Sized,
{
    pub fn new(store: Arc<S>, commit_timeout: Duration) -> Self {
        Self {
            store,
            commit_timeout,
        }
    }

    pub async fn commit(&self, plan: &MutationPlan) -> Result<CommitReceipt> {
        info!(
            kind = %plan.kind,
            id = %plan.id,
            patches = plan.len(),
            "committing mutation plan"
        );
        self.commit_batch(plan.to_batch()).await
    }

    /// Oversized batches are rejected before anything reaches the store; a
    /// batch is never split.
    pub async fn commit_batch(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        let limit = self.store.limits().max_batch_operations;
        if batch.len() > limit {
            return Err(CatalogError::BatchTooLarge {
                operations: batch.len(),
                limit,
            });
        }
        if batch.is_empty() {
            return Err(CatalogError::InvalidOperation(
                "refusing to commit an empty batch".to_string(),
            ));
        }

        let operations = batch.len();
        match timeout(self.commit_timeout, self.store.commit(batch)).await {
            Ok(Ok(receipt)) => {
                debug!(
                    operations,
                    committed_at = %receipt.committed_at,
                    "batch committed"
                );
                Ok(receipt)
            }
            Ok(Err(e)) => {
                error!(operations, "batch commit failed: {}", e);
                Err(e)
            }
            Err(_) => {
                error!(
                    operations,
                    timeout_secs = self.commit_timeout.as_secs_f64(),
                    "batch commit timed out"
                );
                Err(CatalogError::Commit(format!(
                    "commit of {} operations timed out after {:?}",
                    operations, self.commit_timeout
                )))
            }
        }
    }
}
