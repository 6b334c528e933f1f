//! Retrieval modes over the shared vector store.

use crate::llm::LlmClient;
use crate::self_query::{SelfQuerySchema, structure_query};
use pagewise_core::document::RetrievedChunk;
use pagewise_core::filter::MetadataFilter;
use pagewise_core::store::VectorStore;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub enum RetrievalMode {
    /// Plain top-k similarity search.
    Similarity,
    /// The LLM infers a search query and an optional metadata filter first.
    SelfQuery(SelfQuerySchema),
}

/// The outcome of one retrieval.
#[derive(Debug, Clone)]
pub struct Retrieval {
    /// The text actually compared against the index
    pub search_query: String,
    pub filter: Option<MetadataFilter>,
    pub chunks: Vec<RetrievedChunk>,
}

#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    k: usize,
    mode: RetrievalMode,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>, k: usize, mode: RetrievalMode) -> Self {
        Self { store, k, mode }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn mode(&self) -> &RetrievalMode {
        &self.mode
    }

    /// Retrieve chunks for `query` in similarity order.
    ///
    /// Self-query mode uses `llm`, the session's current client.
    pub async fn retrieve(&self, query: &str, llm: &LlmClient) -> pagewise_core::Result<Retrieval> {
        let (search_query, filter) = match &self.mode {
            RetrievalMode::Similarity => (query.to_string(), None),
            RetrievalMode::SelfQuery(schema) => {
                let structured = structure_query(llm, query, schema).await?;
                (structured.query, structured.filter)
            }
        };

        let chunks = self
            .store
            .search(&search_query, self.k, filter.as_ref())
            .await?;

        debug!(
            store = self.store.name(),
            k = self.k,
            filtered = filter.is_some(),
            chunks = chunks.len(),
            "Retrieved chunks"
        );

        Ok(Retrieval {
            search_query,
            filter,
            chunks,
        })
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("store", &self.store.name())
            .field("k", &self.k)
            .field("mode", &self.mode)
            .finish()
    }
}
