use crate::error::{BackendError, BackendErrorKind, QaError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

pub const DEFAULT_HTTP_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_HTTP_EMBEDDING_DIMENSIONS: usize = 384;

/// Which model produced a set of vectors. Vectors from different identities are
/// not comparable, so an index only answers queries embedded by the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbedderIdentity {
    pub model: String,
    pub dimensions: usize,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;

    fn identity(&self) -> EmbedderIdentity {
        EmbedderIdentity {
            model: self.model().to_string(),
            dimensions: self.dimensions(),
        }
    }
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Box<T> {
    fn model(&self) -> &str {
        (**self).model()
    }

    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        (**self).embed(text).await
    }
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Arc<T> {
    fn model(&self) -> &str {
        (**self).model()
    }

    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        (**self).embed(text).await
    }
}

/// Embeds `text`, failing with a timeout once `timeout` elapses and rejecting
/// vectors whose length differs from the embedder's declared dimensions.
pub async fn embed_with_deadline<E: Embedder + ?Sized>(
    embedder: &E,
    text: &str,
    timeout: Duration,
) -> Result<Vec<f32>, BackendError> {
    let vector = tokio::time::timeout(timeout, embedder.embed(text))
        .await
        .map_err(|_| {
            BackendError::timeout(
                embedder.model(),
                format!("no embedding within {}ms", timeout.as_millis()),
            )
        })??;

    if vector.len() != embedder.dimensions() {
        return Err(BackendError::invalid_response(
            embedder.model(),
            format!(
                "embedding dimension {} != {}",
                vector.len(),
                embedder.dimensions()
            ),
        ));
    }

    Ok(vector)
}

/// Local hashed character-trigram embedder. Deterministic and offline.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model(&self) -> &str {
        "character-trigram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        Ok(self.embed_text(text))
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    inputs: [&'a str; 1],
}

/// Client for a text-embeddings-inference style server (`POST {base}/embed`).
pub struct HttpEmbedder {
    client: Client,
    endpoint: Url,
    model: String,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, QaError> {
        let endpoint = Url::parse(&format!("{}/embed", base_url.trim_end_matches('/')))
            .map_err(|error| {
                QaError::InvalidConfiguration(format!("embedding url {base_url:?}: {error}"))
            })?;
        let client = Client::builder().timeout(timeout).build().map_err(|error| {
            QaError::InvalidConfiguration(format!("embedding http client: {error}"))
        })?;

        Ok(Self {
            client,
            endpoint,
            model: DEFAULT_HTTP_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_HTTP_EMBEDDING_DIMENSIONS,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.model = model.into();
        self.dimensions = dimensions;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        debug!(model = %self.model, text_len = text.len(), "embedding text");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&EmbedRequest { inputs: [text] })
            .send()
            .await
            .map_err(|error| BackendError::from_http(&self.model, error))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| BackendError::from_http(&self.model, error))?;

        if !status.is_success() {
            return Err(BackendError::new(
                &self.model,
                BackendErrorKind::Status(status.as_u16()),
                body,
            ));
        }

        parse_embedding_body(&self.model, &body)
    }
}

fn parse_embedding_body(backend: &str, body: &str) -> Result<Vec<f32>, BackendError> {
    let parsed: Vec<Vec<f32>> = serde_json::from_str(body)
        .map_err(|error| BackendError::invalid_response(backend, error.to_string()))?;

    parsed
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::invalid_response(backend, "response held no embeddings"))
}
