use async_trait::async_trait;

use crate::inventory::InventorySnapshot;

/// Failure of a backing store. Opaque to callers above the repository.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    #[error("Record already exists: {0}")]
    Conflict(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Stored document is corrupt: {0}")]
    Corrupt(String),
}

/// Persistence for the single, replaceable inventory snapshot document.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save_snapshot(&self, snapshot: &InventorySnapshot) -> Result<(), RepositoryError>;

    async fn load_snapshot(&self) -> Result<Option<InventorySnapshot>, RepositoryError>;
}
