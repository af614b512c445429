use async_trait::async_trait;
use thiserror::Error;

use crate::state::RetrievedItem;

/// Errors from the similarity-search collaborator. The transient variants
/// are eligible for bounded retry with backoff; `Backend` propagates
/// immediately.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("similarity search timed out")]
    Timeout,

    #[error("similarity search rate limited")]
    RateLimited,

    #[error("similarity search failed: {0}")]
    Backend(String),
}

impl SearchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SearchError::Timeout | SearchError::RateLimited)
    }
}

/// Errors from the reasoning collaborator.
#[derive(Error, Debug)]
pub enum ReasoningError {
    #[error("reasoning engine timed out")]
    Timeout,

    #[error("reasoning engine failed: {0}")]
    Backend(String),
}

/// Similarity search over the embedded corpus. Returns at most `k` items in
/// descending relevance order; a small corpus yields fewer than `k` rather
/// than an error.
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        k: usize,
    ) -> std::result::Result<Vec<RetrievedItem>, SearchError>;
}

/// Language-reasoning collaborator: one prompt in, one reply out. Schema
/// validation of the reply belongs to the calling stage.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn generate(
        &self,
        preamble: &str,
        prompt: &str,
    ) -> std::result::Result<String, ReasoningError>;
}
