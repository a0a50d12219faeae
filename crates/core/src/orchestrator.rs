use crate::answer::{compose_answer, GenerationSettings};
use crate::chunking::{split_with_separators, ChunkingConfig, DEFAULT_SEPARATORS};
use crate::embeddings::Embedder;
use crate::error::{QaError, StorageError};
use crate::generation::{ApiKey, Generator};
use crate::index::{build_index, VectorIndex};
use crate::models::{Document, PipelineStatus, QaOptions, RetrievedChunk};
use crate::retriever;
use crate::traits::IndexStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared read-only reference to a built index.
#[derive(Debug, Clone)]
pub struct IndexHandle {
    index: Arc<VectorIndex>,
}

impl IndexHandle {
    fn new(index: VectorIndex) -> Self {
        Self {
            index: Arc::new(index),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.index.document_id
    }

    pub fn chunk_count(&self) -> usize {
        self.index.len()
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }
}

#[derive(Debug, Clone, Default)]
enum SessionState {
    #[default]
    Unprocessed,
    Indexing {
        document_id: String,
    },
    Ready(IndexHandle),
}

/// Per-session document state. Clones share the same session.
///
/// The lock is never held while a backend call is in flight, so status reads
/// stay responsive during a long build.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    inner: Arc<RwLock<SessionState>>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn status(&self) -> PipelineStatus {
        match &*self.inner.read().await {
            SessionState::Unprocessed => PipelineStatus::Unprocessed,
            SessionState::Indexing { .. } => PipelineStatus::Indexing,
            SessionState::Ready(_) => PipelineStatus::Ready,
        }
    }

    pub async fn handle(&self) -> Option<IndexHandle> {
        match &*self.inner.read().await {
            SessionState::Ready(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    pub async fn document_id(&self) -> Option<String> {
        match &*self.inner.read().await {
            SessionState::Unprocessed => None,
            SessionState::Indexing { document_id } => Some(document_id.clone()),
            SessionState::Ready(handle) => Some(handle.document_id().to_string()),
        }
    }

    /// Forgets the current document. Persisted indexes are left in place.
    pub async fn reset(&self) {
        *self.inner.write().await = SessionState::Unprocessed;
    }

    async fn ready_handle(&self) -> Result<IndexHandle, QaError> {
        match &*self.inner.read().await {
            SessionState::Ready(handle) => Ok(handle.clone()),
            SessionState::Indexing { document_id } => Err(QaError::NotReady(format!(
                "document {document_id} is still being indexed; wait for processing to finish"
            ))),
            SessionState::Unprocessed => Err(QaError::NotReady(
                "no document has been processed; process a document before asking".to_string(),
            )),
        }
    }
}

/// Chunk, embed, persist and answer for one document per session.
pub struct QaPipeline<E, G, S>
where
    E: Embedder,
    G: Generator,
    S: IndexStore,
{
    embedder: E,
    generator: G,
    store: S,
    options: QaOptions,
    builds: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<E, G, S> QaPipeline<E, G, S>
where
    E: Embedder,
    G: Generator,
    S: IndexStore,
{
    pub fn new(embedder: E, generator: G, store: S, options: QaOptions) -> Result<Self, QaError> {
        options.validate()?;
        Ok(Self {
            embedder,
            generator,
            store,
            options,
            builds: Mutex::new(HashMap::new()),
        })
    }

    pub fn options(&self) -> &QaOptions {
        &self.options
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    pub async fn process_document(
        &self,
        state: &PipelineState,
        document: &Document,
    ) -> Result<IndexHandle, QaError> {
        self.process_document_with_cancel(state, document, &CancellationToken::new())
            .await
    }

    /// Moves `state` to `Ready` for `document`. A document already ready in this
    /// session is returned as is, and an index persisted by an earlier build with
    /// the same embedder is loaded instead of re-embedded.
    pub async fn process_document_with_cancel(
        &self,
        state: &PipelineState,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<IndexHandle, QaError> {
        if document.text.trim().is_empty() {
            return Err(QaError::InvalidConfiguration(format!(
                "document {} has no text to index; supply a PDF with extractable text",
                document.id
            )));
        }

        {
            let mut session = state.inner.write().await;
            match &*session {
                SessionState::Ready(handle) if handle.document_id() == document.id => {
                    debug!(document_id = %document.id, "document already indexed");
                    return Ok(handle.clone());
                }
                SessionState::Indexing { document_id } if *document_id == document.id => {
                    return Err(QaError::NotReady(format!(
                        "document {document_id} is already being indexed"
                    )));
                }
                SessionState::Unprocessed => {}
                SessionState::Indexing { document_id } => {
                    info!(previous = %document_id, next = %document.id, "abandoning in-flight document")
                }
                SessionState::Ready(handle) => {
                    info!(previous = %handle.document_id(), next = %document.id, "replacing document")
                }
            }
            *session = SessionState::Indexing {
                document_id: document.id.clone(),
            };
        }

        let outcome = self.load_or_build(document, cancel).await;

        let mut session = state.inner.write().await;
        let still_current = matches!(
            &*session,
            SessionState::Indexing { document_id } if *document_id == document.id
        );
        match outcome {
            Ok(handle) => {
                if still_current {
                    *session = SessionState::Ready(handle.clone());
                }
                Ok(handle)
            }
            Err(error) => {
                if still_current {
                    *session = SessionState::Unprocessed;
                }
                warn!(document_id = %document.id, %error, "document processing failed");
                Err(error)
            }
        }
    }

    /// Top-k chunks of the session's document for `question`.
    pub async fn retrieve(
        &self,
        state: &PipelineState,
        question: &str,
    ) -> Result<Vec<RetrievedChunk>, QaError> {
        let handle = state.ready_handle().await?;
        retriever::search(
            handle.index(),
            question,
            self.options.top_k,
            &self.embedder,
            self.options.request_timeout,
        )
        .await
    }

    pub async fn ask(
        &self,
        state: &PipelineState,
        question: &str,
        api_key: &ApiKey,
    ) -> Result<String, QaError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QaError::InvalidConfiguration("question is empty".to_string()));
        }
        if api_key.is_empty() {
            return Err(QaError::InvalidConfiguration(
                "a generation API key is required to answer questions".to_string(),
            ));
        }

        let retrieved = self.retrieve(state, question).await?;
        let context: Vec<&str> = retrieved.iter().map(|chunk| chunk.text.as_str()).collect();

        compose_answer(
            question,
            &context,
            &self.generator,
            GenerationSettings {
                temperature: self.options.temperature,
                timeout: self.options.request_timeout,
            },
            api_key,
        )
        .await
    }

    /// Processes `document` if needed, then answers `question` about it.
    pub async fn answer(
        &self,
        state: &PipelineState,
        document: &Document,
        question: &str,
        api_key: &ApiKey,
    ) -> Result<String, QaError> {
        self.process_document(state, document).await?;
        self.ask(state, question, api_key).await
    }

    async fn load_or_build(
        &self,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<IndexHandle, QaError> {
        // At most one build per document id, across every session of this pipeline.
        let lock = self.build_lock(&document.id).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.load_or_build_locked(document, cancel).await
        };
        self.release_build_lock(&document.id, lock).await;
        outcome
    }

    async fn load_or_build_locked(
        &self,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<IndexHandle, QaError> {
        let chunking = ChunkingConfig::try_from(&self.options)?;
        if let Some(index) = self.load_persisted(&document.id, &chunking).await? {
            return Ok(IndexHandle::new(index));
        }

        let chunks = split_with_separators(&document.text, chunking, &DEFAULT_SEPARATORS);
        info!(document_id = %document.id, chunk_count = chunks.len(), "indexing document");

        let index = build_index(
            &document.id,
            chunking,
            &chunks,
            &self.embedder,
            &self.store,
            self.options.request_timeout,
            cancel,
        )
        .await?;
        Ok(IndexHandle::new(index))
    }

    /// A persisted index for `document_id`, if one exists that this pipeline's
    /// embedder and chunking settings would have produced.
    async fn load_persisted(
        &self,
        document_id: &str,
        chunking: &ChunkingConfig,
    ) -> Result<Option<VectorIndex>, QaError> {
        if !self.store.exists(document_id).await? {
            return Ok(None);
        }

        let bytes = match self.store.read(document_id).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        let index = match VectorIndex::from_bytes(&bytes) {
            Ok(index) => index,
            Err(error) => {
                warn!(document_id, %error, "persisted index is unreadable; rebuilding");
                return Ok(None);
            }
        };

        if index.document_id != document_id {
            warn!(
                document_id,
                stored_id = %index.document_id,
                "persisted index belongs to another document; rebuilding"
            );
            return Ok(None);
        }
        if !index.is_compatible_with(&self.embedder.identity()) {
            warn!(
                document_id,
                stored_model = %index.embedder.model,
                current_model = %self.embedder.model(),
                "persisted index was built by another embedder; rebuilding"
            );
            return Ok(None);
        }
        if !index.was_chunked_with(chunking) {
            warn!(
                document_id,
                stored_chunk_size = index.chunking.max_chars,
                stored_overlap = index.chunking.overlap_chars,
                chunk_size = chunking.max_chars,
                overlap = chunking.overlap_chars,
                "persisted index was chunked with other settings; rebuilding"
            );
            return Ok(None);
        }

        info!(document_id, chunk_count = index.len(), "reusing persisted index");
        Ok(Some(index))
    }

    async fn build_lock(&self, document_id: &str) -> Arc<Mutex<()>> {
        let mut builds = self.builds.lock().await;
        builds.entry(document_id.to_string()).or_default().clone()
    }

    async fn release_build_lock(&self, document_id: &str, lock: Arc<Mutex<()>>) {
        let mut builds = self.builds.lock().await;
        // Only the map and `lock` remain, so no other build is waiting on it.
        if Arc::strong_count(&lock) == 2 {
            builds.remove(document_id);
        }
    }
}
