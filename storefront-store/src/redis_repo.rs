use async_trait::async_trait;
use redis::{AsyncCommands, RedisResult};
use storefront_core::inventory::InventorySnapshot;
use storefront_core::repository::{RepositoryError, SnapshotStore};
use tracing::debug;

pub const SNAPSHOT_KEY: &str = "inventory:snapshot";

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    pub async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn set_document(&self, key: &str, document: String) -> RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set(key, document).await
    }

    async fn get_document(&self, key: &str) -> RedisResult<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.get(key).await
    }
}

/// The last good inventory snapshot, kept as one JSON document in Redis.
#[async_trait]
impl SnapshotStore for RedisClient {
    async fn save_snapshot(&self, snapshot: &InventorySnapshot) -> Result<(), RepositoryError> {
        let document = serde_json::to_string(snapshot).map_err(|e| RepositoryError::Corrupt(e.to_string()))?;
        self.set_document(SNAPSHOT_KEY, document)
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))?;
        debug!(products = snapshot.products.len(), "Inventory snapshot saved to Redis");
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<InventorySnapshot>, RepositoryError> {
        let document = self
            .get_document(SNAPSHOT_KEY)
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))?;

        document
            .map(|d| serde_json::from_str(&d).map_err(|e| RepositoryError::Corrupt(e.to_string())))
            .transpose()
    }
}
