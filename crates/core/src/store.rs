//! VectorStore trait: the read side of the document index.
//!
//! The index is built once per process and then shared read-only by every
//! session, so implementations only need `&self` for searching.

use async_trait::async_trait;

use crate::document::RetrievedChunk;
use crate::error::RetrievalError;
use crate::filter::MetadataFilter;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// A human-readable backend name.
    fn name(&self) -> &str;

    /// Return up to `k` chunks most similar to `query`, best first.
    ///
    /// When `filter` is set, only chunks matching it are ranked. An empty
    /// result is not an error.
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> std::result::Result<Vec<RetrievedChunk>, RetrievalError>;

    /// Number of indexed chunks.
    async fn count(&self) -> std::result::Result<usize, RetrievalError>;
}
