//! Deterministic embedding provider for tests.

use async_trait::async_trait;
use pagewise_core::error::ProviderError;
use pagewise_core::message::Message;
use pagewise_core::provider::*;

const DIMENSIONS: usize = 256;

/// Embeds text as hashed word counts, so texts sharing words score higher.
pub struct HashEmbeddingProvider;

pub fn hash_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMENSIONS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
    {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in word.to_lowercase().bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        v[(h % DIMENSIONS as u64) as usize] += 1.0;
    }
    v
}

#[async_trait]
impl Provider for HashEmbeddingProvider {
    fn name(&self) -> &str {
        "hash"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            message: Message::assistant(""),
            usage: None,
            model: request.model,
            metadata: serde_json::Map::new(),
        })
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        Ok(EmbeddingResponse {
            embeddings: request.inputs.iter().map(|t| hash_embedding(t)).collect(),
            model: request.model,
            usage: None,
        })
    }
}
