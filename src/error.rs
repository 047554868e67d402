//! Engine error taxonomy
//!
//! Expected failure modes are returned as values. Collaborators report
//! `anyhow` errors which the engine folds into these variants.

use crate::catalog::ItemId;
use crate::config::ConfigError;

/// Errors surfaced by the engine to its presentation layer
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Remote or collaborator fetch failed. No local state was changed.
    #[error("Fetch failed: {0}")]
    TransientFetch(String),

    #[error("A download is already in progress for item {item_id}")]
    AlreadyInProgress { item_id: ItemId },

    #[error("No download is in progress")]
    NoActiveDownload,

    /// Local removal failed; cache status and install index are unchanged.
    #[error("Failed to delete item {item_id}: {reason}")]
    DeletionFailed { item_id: ItemId, reason: String },

    /// Collaborator handed back data that breaks an engine invariant.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Item {0} is not in the catalog")]
    UnknownItem(ItemId),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Engine is closed")]
    Closed,
}

impl EngineError {
    /// Wrap a collaborator error as a transient fetch failure
    pub fn fetch(err: anyhow::Error) -> Self {
        EngineError::TransientFetch(format!("{:#}", err))
    }

    /// Whether the caller may simply retry the operation later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::TransientFetch(_) | EngineError::DeletionFailed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
