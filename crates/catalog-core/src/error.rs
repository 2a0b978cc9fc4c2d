use thiserror::Error;

use crate::{EntityId, EntityKind};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Entity not found: {kind} {id}")]
    EntityNotFound { kind: EntityKind, id: EntityId },

    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Batch too large: {operations} operations exceeds the limit of {limit}")]
    BatchTooLarge { operations: usize, limit: usize },

    #[error("Version conflict on {key}: {detail}")]
    Conflict { key: String, detail: String },

    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Document store error: {0}")]
    Store(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Notification error: {0}")]
    Notification(String),
}

impl CatalogError {
    pub fn not_found(kind: EntityKind, id: &EntityId) -> Self {
        Self::EntityNotFound {
            kind,
            id: id.clone(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EntityNotFound { .. })
    }

    /// Errors a caller may resolve by reloading state and submitting again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::Resolution(_) | Self::Commit(_) | Self::Store(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_classified_separately_from_resolution() {
        let missing = CatalogError::not_found(EntityKind::Game, &EntityId::from("g-1"));
        assert!(missing.is_not_found());
        assert!(!missing.is_retryable());

        let chunk = CatalogError::Resolution("chunk 2 of 2 failed".into());
        assert!(!chunk.is_not_found());
        assert!(chunk.is_retryable());
    }

    #[test]
    fn batch_too_large_message_names_both_numbers() {
        let err = CatalogError::BatchTooLarge {
            operations: 501,
            limit: 500,
        };
        assert_eq!(
            err.to_string(),
            "Batch too large: 501 operations exceeds the limit of 500"
        );
    }
}
