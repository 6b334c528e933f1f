//! Embedding client shared by ingestion and search.

use pagewise_core::error::RetrievalError;
use pagewise_core::provider::{EmbeddingRequest, Provider};
use std::sync::Arc;
use tracing::debug;

/// Computes embeddings with one provider and one model.
///
/// The same model must embed the indexed chunks and the queries, so the
/// index records the model name and refuses to open with another one.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn Provider>,
    model: String,
    batch_size: usize,
}

impl Embedder {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            batch_size: 64,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed a single search query.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut embeddings = self.embed_batch(vec![text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| RetrievalError::EmbeddingFailed("empty embedding response".into()))
    }

    /// Embed many texts, `batch_size` per request, preserving order.
    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let mut all = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(batch = i, size = batch.len(), model = %self.model, "Embedding batch");
            all.extend(self.embed_batch(batch.to_vec()).await?);
        }
        Ok(all)
    }

    async fn embed_batch(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let expected = inputs.len();
        let response = self
            .provider
            .embed(EmbeddingRequest {
                model: self.model.clone(),
                inputs,
            })
            .await
            .map_err(|e| RetrievalError::EmbeddingFailed(e.to_string()))?;

        if response.embeddings.len() != expected {
            return Err(RetrievalError::EmbeddingFailed(format!(
                "expected {expected} embeddings, got {}",
                response.embeddings.len()
            )));
        }

        Ok(response.embeddings)
    }
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}
