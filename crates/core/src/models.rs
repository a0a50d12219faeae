use crate::error::QaError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }

    /// Builds a document whose id is the SHA-256 digest of its text.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: digest_bytes(text.as_bytes()),
            text,
        }
    }
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub position: usize,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStatus {
    Unprocessed,
    Indexing,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub temperature: f32,
    pub request_timeout: Duration,
}

impl Default for QaOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            top_k: 3,
            temperature: 0.1,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl QaOptions {
    pub fn validate(&self) -> Result<(), QaError> {
        if self.chunk_size == 0 {
            return Err(QaError::InvalidConfiguration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(QaError::InvalidConfiguration(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(QaError::InvalidConfiguration(
                "top_k must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=5.0).contains(&self.temperature) {
            return Err(QaError::InvalidConfiguration(format!(
                "temperature {} is outside 0.0..=5.0",
                self.temperature
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(QaError::InvalidConfiguration(
                "request_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
