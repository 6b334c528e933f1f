//! Shared test helpers for pipeline tests.

use async_trait::async_trait;
use pagewise_core::document::{Chunk, RetrievedChunk};
use pagewise_core::error::{ProviderError, RetrievalError};
use pagewise_core::filter::MetadataFilter;
use pagewise_core::message::Message;
use pagewise_core::provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
use pagewise_core::store::VectorStore;
use std::sync::Mutex;

/// A mock provider that returns scripted responses in sequence and records
/// every request it receives.
///
/// Panics if more calls are made than responses provided.
pub struct ScriptedProvider {
    responses: Mutex<Vec<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(t.to_string())).collect())
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next(&self, request: ProviderRequest) -> Result<String, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let responses = self.responses.lock().unwrap();
        let n = requests.len();
        if n >= responses.len() {
            panic!(
                "ScriptedProvider: no more responses (call #{}, have {})",
                n,
                responses.len()
            );
        }
        requests.push(request);
        responses[n].clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let text = self.next(request)?;
        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "mock-model".into(),
            metadata: serde_json::Map::new(),
        })
    }

    /// Streams the scripted text one word at a time.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        let text = self.next(request)?;
        let pieces: Vec<String> = text.split_inclusive(' ').map(String::from).collect();
        let (tx, rx) = tokio::sync::mpsc::channel(pieces.len() + 1);
        for piece in pieces {
            let _ = tx
                .send(Ok(StreamChunk {
                    content: Some(piece),
                    done: false,
                    usage: None,
                }))
                .await;
        }
        let _ = tx
            .send(Ok(StreamChunk {
                content: None,
                done: true,
                usage: None,
            }))
            .await;
        Ok(rx)
    }
}

/// A vector store returning its chunks in stored order, filtered, and
/// recording every search.
pub struct StaticStore {
    chunks: Vec<Chunk>,
    searches: Mutex<Vec<(String, usize, Option<MetadataFilter>)>>,
}

impl StaticStore {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks,
            searches: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn searches(&self) -> Vec<(String, usize, Option<MetadataFilter>)> {
        self.searches.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorStore for StaticStore {
    fn name(&self) -> &str {
        "static"
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        self.searches
            .lock()
            .unwrap()
            .push((query.to_string(), k, filter.cloned()));

        Ok(self
            .chunks
            .iter()
            .filter(|c| filter.is_none_or(|f| f.matches(c)))
            .take(k)
            .enumerate()
            .map(|(rank, c)| RetrievedChunk::from_chunk(c, rank, 1.0 - rank as f32 * 0.1))
            .collect())
    }

    async fn count(&self) -> Result<usize, RetrievalError> {
        Ok(self.chunks.len())
    }
}

pub fn chunk(page: u32, content: &str) -> Chunk {
    Chunk {
        id: format!("chunk-{page}"),
        content: content.into(),
        page,
        start_index: 0,
        source: "document.pdf".into(),
    }
}

/// A small extract of the medical devices regulation.
pub fn mdr_chunks() -> Vec<Chunk> {
    vec![
        chunk(
            0,
            "Regulation (EU) 2017/745 of the European Parliament and of the Council on medical devices",
        ),
        chunk(
            4,
            "This Regulation lays down rules concerning the placing on the market of medical devices for human use",
        ),
        chunk(11, "Notified bodies shall verify the conformity of devices"),
        chunk(27, "Post-market surveillance system of the manufacturer"),
        chunk(40, "Annex I General safety and performance requirements"),
        chunk(41, "Annex II Technical documentation"),
    ]
}
