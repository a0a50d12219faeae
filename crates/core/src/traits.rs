use crate::error::StorageError;
use async_trait::async_trait;

/// Durable home for serialized indexes, keyed by document id.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Stores `serialized` under `document_id`, replacing any previous contents.
    async fn write(&self, document_id: &str, serialized: &[u8]) -> Result<(), StorageError>;

    /// Fails with [`StorageError::NotFound`] when nothing is stored for `document_id`.
    async fn read(&self, document_id: &str) -> Result<Vec<u8>, StorageError>;

    async fn exists(&self, document_id: &str) -> Result<bool, StorageError>;
}
