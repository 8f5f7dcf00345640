//! Typed failures surfaced at the core boundary.
//!
//! Collaborator traits return `anyhow::Result`; the retriever, index
//! builder, and request handler convert those failures into [`RagError`]
//! so callers can map them to user-facing messages and status codes.

use thiserror::Error;

/// Error taxonomy for a single request or index build.
#[derive(Debug, Error)]
pub enum RagError {
    /// Missing or invalid directive, model, or retrieval configuration. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No persisted index and no readable source documents.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// The vector index failed to read or write.
    #[error("index error: {0}")]
    Index(String),

    /// Embedding a query or passage failed after retries.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The generation service failed or returned an empty answer.
    #[error("generation failed: {0}")]
    Generation(String),

    /// The generation call exceeded its deadline.
    #[error("generation timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The session store could not be read or written.
    #[error("session store error: {0}")]
    SessionStore(String),

    /// The request itself is malformed (e.g. an empty query).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RagError {
    /// Machine-readable status code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::Configuration(_) => "configuration_error",
            RagError::IndexUnavailable(_) => "index_unavailable",
            RagError::Index(_) => "index_error",
            RagError::Embedding(_) => "embedding_failure",
            RagError::Generation(_) => "generation_failure",
            RagError::Timeout { .. } => "timeout",
            RagError::SessionStore(_) => "session_store_failure",
            RagError::InvalidRequest(_) => "bad_request",
        }
    }

    /// Whether the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::Embedding(_) | RagError::Generation(_) | RagError::Timeout { .. }
        )
    }

    /// Wrap a collaborator failure as an embedding error, keeping its context chain.
    pub fn embedding(err: anyhow::Error) -> Self {
        RagError::Embedding(format!("{:#}", err))
    }

    /// Wrap a collaborator failure as an index error, keeping its context chain.
    pub fn index(err: anyhow::Error) -> Self {
        RagError::Index(format!("{:#}", err))
    }

    /// Wrap a collaborator failure as a generation error, keeping its context chain.
    pub fn generation(err: anyhow::Error) -> Self {
        RagError::Generation(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RagError::Timeout { secs: 120 }.is_retryable());
        assert!(RagError::Embedding("down".into()).is_retryable());
        assert!(!RagError::Configuration("no directive".into()).is_retryable());
        assert!(!RagError::InvalidRequest("empty".into()).is_retryable());
    }

    #[test]
    fn test_context_chain_preserved() {
        let err = anyhow::anyhow!("connection refused").context("POST /api/embed");
        let wrapped = RagError::embedding(err);
        let msg = wrapped.to_string();
        assert!(msg.contains("POST /api/embed"));
        assert!(msg.contains("connection refused"));
        assert_eq!(wrapped.code(), "embedding_failure");
    }
}
