use crate::embeddings::{embed_with_deadline, Embedder};
use crate::error::QaError;
use crate::index::VectorIndex;
use crate::models::RetrievedChunk;
use std::time::Duration;
use tracing::debug;

/// Returns at most `k` chunks of `index` ranked by cosine similarity to `query`,
/// highest first. Equal scores keep chunking order.
///
/// `embedder` must be the embedder the index was built with.
pub async fn search<E: Embedder + ?Sized>(
    index: &VectorIndex,
    query: &str,
    k: usize,
    embedder: &E,
    timeout: Duration,
) -> Result<Vec<RetrievedChunk>, QaError> {
    if k == 0 {
        return Err(QaError::InvalidConfiguration(
            "k must be greater than zero".to_string(),
        ));
    }

    let identity = embedder.identity();
    if !index.is_compatible_with(&identity) {
        return Err(QaError::InvalidConfiguration(format!(
            "index for {} was built with {} ({} dims) but queried with {} ({} dims)",
            index.document_id,
            index.embedder.model,
            index.embedder.dimensions,
            identity.model,
            identity.dimensions
        )));
    }

    let query_vector = embed_with_deadline(embedder, query, timeout)
        .await
        .map_err(QaError::Embedding)?;

    let mut scored: Vec<RetrievedChunk> = index
        .entries
        .iter()
        .map(|entry| RetrievedChunk {
            position: entry.position,
            text: entry.text.clone(),
            score: cosine_similarity(&entry.vector, &query_vector),
        })
        .collect();

    // `sort_by` is stable, which keeps ties in insertion order.
    scored.sort_by(|left, right| right.score.total_cmp(&left.score));
    scored.truncate(k);

    debug!(
        document_id = %index.document_id,
        requested = k,
        returned = scored.len(),
        "retrieved chunks"
    );
    Ok(scored)
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm * right_norm)
}
