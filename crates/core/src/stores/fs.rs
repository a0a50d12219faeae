use crate::error::StorageError;
use crate::traits::IndexStore;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// One `<document_id>.index.json` file per document under a root directory.
#[derive(Debug, Clone)]
pub struct FsIndexStore {
    root: PathBuf,
}

impl FsIndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, document_id: &str) -> Result<PathBuf, StorageError> {
        let valid = !document_id.is_empty()
            && document_id
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !valid {
            return Err(StorageError::InvalidKey(document_id.to_string()));
        }
        Ok(self.root.join(format!("{document_id}.index.json")))
    }
}

#[async_trait]
impl IndexStore for FsIndexStore {
    async fn write(&self, document_id: &str, serialized: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(document_id)?;
        fs::create_dir_all(&self.root).await?;

        // Readers only ever observe a complete file.
        let staging = self
            .root
            .join(format!(".{document_id}.{}.tmp", Uuid::new_v4()));
        fs::write(&staging, serialized).await?;
        if let Err(error) = fs::rename(&staging, &path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(error.into());
        }

        debug!(path = %path.display(), bytes = serialized.len(), "index written");
        Ok(())
    }

    async fn read(&self, document_id: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(document_id)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(document_id.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn exists(&self, document_id: &str) -> Result<bool, StorageError> {
        let path = self.path_for(document_id)?;
        Ok(fs::try_exists(&path).await?)
    }
}
