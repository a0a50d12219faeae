use crate::chunking::ChunkingConfig;
use crate::embeddings::{embed_with_deadline, Embedder, EmbedderIdentity};
use crate::error::{QaError, StorageError};
use crate::traits::IndexStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub position: usize,
    pub text: String,
    pub vector: Vec<f32>,
}

/// Every chunk of one document with its embedding, in chunking order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    pub document_id: String,
    pub embedder: EmbedderIdentity,
    /// Settings the chunks were produced with.
    pub chunking: ChunkingConfig,
    pub built_at: DateTime<Utc>,
    pub entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Embeds every chunk in order. The first embedding failure aborts the build,
    /// so an index never holds only part of a document.
    pub async fn build<E: Embedder + ?Sized>(
        document_id: &str,
        chunking: ChunkingConfig,
        chunks: &[String],
        embedder: &E,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Self, QaError> {
        let mut entries = Vec::with_capacity(chunks.len());

        for (position, text) in chunks.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(document_id, embedded = position, "index build cancelled");
                return Err(QaError::Cancelled);
            }

            let vector = embed_with_deadline(embedder, text, timeout)
                .await
                .map_err(QaError::Embedding)?;
            debug!(document_id, position, "chunk embedded");

            entries.push(IndexEntry {
                position,
                text: text.clone(),
                vector,
            });
        }

        Ok(Self {
            document_id: document_id.to_string(),
            embedder: embedder.identity(),
            chunking,
            built_at: Utc::now(),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_compatible_with(&self, identity: &EmbedderIdentity) -> bool {
        &self.embedder == identity
    }

    pub fn was_chunked_with(&self, chunking: &ChunkingConfig) -> bool {
        &self.chunking == chunking
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Builds the index for `document_id` and persists it, replacing whatever was
/// stored for that id before. Nothing is written if the build fails.
pub async fn build_index<E, S>(
    document_id: &str,
    chunking: ChunkingConfig,
    chunks: &[String],
    embedder: &E,
    store: &S,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<VectorIndex, QaError>
where
    E: Embedder + ?Sized,
    S: IndexStore + ?Sized,
{
    let index =
        VectorIndex::build(document_id, chunking, chunks, embedder, timeout, cancel).await?;
    store.write(document_id, &index.to_bytes()?).await?;

    info!(
        document_id,
        chunk_count = index.len(),
        model = %index.embedder.model,
        "index built"
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::BackendError;
    use crate::stores::FsIndexStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct FailingOnSecondChunk {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FailingOnSecondChunk {
        fn model(&self) -> &str {
            "flaky"
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, BackendError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err(BackendError::timeout("flaky", "second chunk"));
            }
            Ok(vec![1.0, 0.0])
        }
    }

    fn chunking() -> ChunkingConfig {
        ChunkingConfig::new(20, 5).unwrap()
    }

    fn chunks(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|text| text.to_string()).collect()
    }

    #[tokio::test]
    async fn build_persists_every_chunk() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = FsIndexStore::new(dir.path());
        let embedder = CharacterNgramEmbedder::default();
        let texts = chunks(&["alpha beta", "gamma delta", "epsilon"]);

        let index = build_index(
            "doc",
            chunking(),
            &texts,
            &embedder,
            &store,
            TIMEOUT,
            &CancellationToken::new(),
        )
        .await?;

        assert_eq!(index.len(), 3);
        assert_eq!(index.entries[1].position, 1);
        assert_eq!(index.entries[1].text, "gamma delta");
        assert!(index.is_compatible_with(&embedder.identity()));

        let restored = VectorIndex::from_bytes(&store.read("doc").await?)?;
        assert_eq!(restored.document_id, "doc");
        assert_eq!(restored.embedder, index.embedder);
        assert!(restored.was_chunked_with(&chunking()));
        let restored_texts: Vec<&str> = restored.entries.iter().map(|entry| entry.text.as_str()).collect();
        assert_eq!(restored_texts, vec!["alpha beta", "gamma delta", "epsilon"]);
        Ok(())
    }

    #[tokio::test]
    async fn embedding_failure_aborts_without_persisting() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = FsIndexStore::new(dir.path());
        let embedder = FailingOnSecondChunk {
            calls: AtomicUsize::new(0),
        };

        let result = build_index(
            "doc",
            chunking(),
            &chunks(&["one", "two", "three"]),
            &embedder,
            &store,
            TIMEOUT,
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(QaError::Embedding(ref error)) if error.is_timeout()));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
        assert!(!store.exists("doc").await?);
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_build_stops_before_embedding() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = VectorIndex::build(
            "doc",
            chunking(),
            &chunks(&["one"]),
            &CharacterNgramEmbedder::default(),
            TIMEOUT,
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(QaError::Cancelled)));
    }

    #[test]
    fn corrupt_bytes_are_reported() {
        let result = VectorIndex::from_bytes(b"{not json");
        assert!(matches!(result, Err(StorageError::Corrupt(_))));
    }
}
