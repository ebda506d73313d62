use async_trait::async_trait;
use storefront_core::inventory::InventorySnapshot;
use storefront_core::repository::{RepositoryError, SnapshotStore};
use tokio::sync::RwLock;

/// Snapshot store that lives only as long as the process.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshot: RwLock<Option<InventorySnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save_snapshot(&self, snapshot: &InventorySnapshot) -> Result<(), RepositoryError> {
        *self.snapshot.write().await = Some(snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<InventorySnapshot>, RepositoryError> {
        Ok(self.snapshot.read().await.clone())
    }
}
