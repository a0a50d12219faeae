pub mod answer;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod index;
pub mod models;
pub mod orchestrator;
pub mod retriever;
pub mod stores;
pub mod traits;

pub use answer::{
    build_prompt, compose_answer, is_fallback_answer, GenerationSettings, FALLBACK_ANSWER,
};
pub use chunking::{split_text, split_with_separators, ChunkingConfig, DEFAULT_SEPARATORS};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbedderIdentity, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_HTTP_EMBEDDING_DIMENSIONS, DEFAULT_HTTP_EMBEDDING_MODEL,
};
pub use error::{BackendError, BackendErrorKind, IngestError, QaError, StorageError};
pub use extractor::{
    document_from_pdf_bytes, join_pages, load_pdf_document, LopdfExtractor, PageText, PdfExtractor,
};
pub use generation::{
    ApiKey, CohereGenerator, GenerationRequest, GenerationResponse, Generator, COHERE_BASE_URL,
    DEFAULT_COHERE_MODEL,
};
pub use index::{build_index, IndexEntry, VectorIndex};
pub use models::{Document, PipelineStatus, QaOptions, RetrievedChunk};
pub use orchestrator::{IndexHandle, PipelineState, QaPipeline};
pub use retriever::search;
pub use stores::FsIndexStore;
pub use traits::IndexStore;
pub use tokio_util::sync::CancellationToken;
