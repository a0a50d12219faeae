use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),
}

/// Failure category of a call to an embedding or generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    Timeout,
    Connect,
    Status(u16),
    InvalidResponse,
    Other,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Connect => write!(f, "connection failed"),
            Self::Status(code) => write!(f, "returned status {code}"),
            Self::InvalidResponse => write!(f, "returned an invalid response"),
            Self::Other => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{backend} {kind}: {message}")]
pub struct BackendError {
    pub backend: String,
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(backend: impl Into<String>, kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(backend, BackendErrorKind::Timeout, message)
    }

    pub fn invalid_response(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(backend, BackendErrorKind::InvalidResponse, message)
    }

    /// Classifies a transport error from `reqwest`.
    pub fn from_http(backend: impl Into<String>, error: reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            BackendErrorKind::Timeout
        } else if error.is_connect() {
            BackendErrorKind::Connect
        } else if let Some(status) = error.status() {
            BackendErrorKind::Status(status.as_u16())
        } else if error.is_decode() {
            BackendErrorKind::InvalidResponse
        } else {
            BackendErrorKind::Other
        };
        Self::new(backend, kind, error.to_string())
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == BackendErrorKind::Timeout
    }

    /// Whether the same call may succeed if the caller tries again later.
    pub fn is_transient(&self) -> bool {
        match self.kind {
            BackendErrorKind::Timeout | BackendErrorKind::Connect => true,
            BackendErrorKind::Status(code) => code == 429 || code >= 500,
            BackendErrorKind::InvalidResponse | BackendErrorKind::Other => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no index stored for document {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored index is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("invalid document id for storage: {0:?}")]
    InvalidKey(String),
}

#[derive(Debug, Error)]
pub enum QaError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("embedding failed: {0}")]
    Embedding(#[source] BackendError),

    #[error("generation failed: {0}")]
    Generation(#[source] BackendError),

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("index storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("index build was cancelled")]
    Cancelled,

    #[error("document ingest error: {0}")]
    Ingest(#[from] IngestError),
}

impl QaError {
    pub fn backend(&self) -> Option<&BackendError> {
        match self {
            Self::Embedding(error) | Self::Generation(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.backend().is_some_and(BackendError::is_timeout)
    }
}

pub type Result<T, E = QaError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let timeout = BackendError::timeout("cohere", "slow");
        assert!(timeout.is_timeout());
        assert!(timeout.is_transient());

        let throttled = BackendError::new("cohere", BackendErrorKind::Status(429), "slow down");
        assert!(throttled.is_transient());

        let unauthorized = BackendError::new("cohere", BackendErrorKind::Status(401), "bad key");
        assert!(!unauthorized.is_transient());
        assert!(!unauthorized.is_timeout());
    }

    #[test]
    fn generation_timeout_is_distinct_from_embedding_failure() {
        let generation = QaError::Generation(BackendError::timeout("cohere", "deadline"));
        let embedding = QaError::Embedding(BackendError::timeout("tei", "deadline"));

        assert!(generation.is_timeout());
        assert!(matches!(generation, QaError::Generation(_)));
        assert!(!matches!(embedding, QaError::Generation(_)));
        assert_eq!(
            generation.to_string(),
            "generation failed: cohere timed out: deadline"
        );
    }
}
