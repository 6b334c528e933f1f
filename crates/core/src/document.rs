//! Document chunks, the unit of indexing and retrieval.

use serde::{Deserialize, Serialize};

/// A bounded span of source document text with page/offset metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique chunk id
    pub id: String,

    /// The chunk text
    pub content: String,

    /// Zero-based page number within the source document
    pub page: u32,

    /// Character offset of the chunk within its page text
    pub start_index: usize,

    /// Path of the source document
    pub source: String,
}

/// A chunk returned by a search, in similarity order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub content: String,

    /// Zero-based page number (as stored)
    pub page: u32,

    pub start_index: usize,

    pub source: String,

    /// Zero-based position in similarity order
    pub rank: usize,

    /// Cosine similarity to the query
    pub score: f32,
}

impl RetrievedChunk {
    pub fn from_chunk(chunk: &Chunk, rank: usize, score: f32) -> Self {
        Self {
            content: chunk.content.clone(),
            page: chunk.page,
            start_index: chunk.start_index,
            source: chunk.source.clone(),
            rank,
            score,
        }
    }

    /// The page number as readers see it (1-based).
    pub fn display_page(&self) -> u32 {
        self.page + 1
    }
}
