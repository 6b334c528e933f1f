//! Persisted vector index.
//!
//! Layout of the persist directory:
//!
//! ```text
//! db/
//!   manifest.json   embedding model, chunk count, creation time
//!   chunks.jsonl    one chunk + embedding per line
//! ```
//!
//! The directory's existence means "already indexed": `open_or_build` opens
//! it and never re-embeds. A build writes into a sibling `.partial`
//! directory first and renames it into place, so an interrupted build does
//! not leave a half-written index behind.

use crate::embedder::Embedder;
use crate::ingest::ingest_document;
use crate::splitter::RecursiveSplitter;
use crate::vector::rank_by_similarity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pagewise_core::document::{Chunk, RetrievedChunk};
use pagewise_core::error::RetrievalError;
use pagewise_core::filter::MetadataFilter;
use pagewise_core::store::VectorStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MANIFEST_FILE: &str = "manifest.json";
const CHUNKS_FILE: &str = "chunks.jsonl";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub version: u32,
    pub embedding_model: String,
    pub chunk_count: usize,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl IndexManifest {
    /// Read the manifest of the index at `dir` without loading its chunks.
    pub async fn read(dir: &Path) -> Result<Self, RetrievalError> {
        let raw = tokio::fs::read_to_string(dir.join(MANIFEST_FILE))
            .await
            .map_err(|e| {
                RetrievalError::Storage(format!("Failed to read index manifest in {}: {e}", dir.display()))
            })?;
        serde_json::from_str(&raw)
            .map_err(|e| RetrievalError::Storage(format!("Invalid index manifest: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedChunk {
    #[serde(flatten)]
    chunk: Chunk,
    embedding: Vec<f32>,
}

/// A read-only, in-memory vector index loaded from (or persisted to) disk.
#[derive(Debug)]
pub struct VectorIndex {
    dir: PathBuf,
    manifest: IndexManifest,
    entries: Vec<IndexedChunk>,
    embedder: Embedder,
}

impl VectorIndex {
    /// Open a persisted index.
    pub async fn open(dir: &Path, embedder: Embedder) -> Result<Self, RetrievalError> {
        let manifest = IndexManifest::read(dir).await?;

        if manifest.embedding_model != embedder.model() {
            return Err(RetrievalError::Storage(format!(
                "Index at {} was built with embedding model '{}' but '{}' is configured; \
                 rebuild it with `pagewise ingest --force`",
                dir.display(),
                manifest.embedding_model,
                embedder.model()
            )));
        }

        let content = tokio::fs::read_to_string(dir.join(CHUNKS_FILE))
            .await
            .map_err(|e| RetrievalError::Storage(format!("Failed to read index chunks: {e}")))?;

        let entries: Vec<IndexedChunk> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<IndexedChunk>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted index entry");
                    None
                }
            })
            .collect();

        if entries.len() != manifest.chunk_count {
            warn!(
                expected = manifest.chunk_count,
                loaded = entries.len(),
                "Index chunk count differs from manifest"
            );
        }

        info!(dir = %dir.display(), chunks = entries.len(), "Vector index opened");

        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
            entries,
            embedder,
        })
    }

    /// Embed `chunks` and persist them as a new index at `dir`.
    pub async fn build(
        dir: &Path,
        chunks: Vec<Chunk>,
        source: &str,
        embedder: Embedder,
    ) -> Result<Self, RetrievalError> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = embedder.embed_documents(&texts).await?;

        let entries: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexedChunk { chunk, embedding })
            .collect();

        let manifest = IndexManifest {
            version: FORMAT_VERSION,
            embedding_model: embedder.model().to_string(),
            chunk_count: entries.len(),
            source: source.to_string(),
            created_at: Utc::now(),
        };

        persist(dir, &manifest, &entries).await?;
        info!(dir = %dir.display(), chunks = entries.len(), "Vector index built");

        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
            entries,
            embedder,
        })
    }

    /// Open the index at `dir`, or ingest `document` and build it there.
    ///
    /// With `force`, an existing index is removed and rebuilt.
    pub async fn open_or_build(
        dir: &Path,
        document: &Path,
        splitter: &RecursiveSplitter,
        embedder: Embedder,
        force: bool,
    ) -> pagewise_core::Result<Self> {
        if dir.exists() {
            if !force {
                debug!(dir = %dir.display(), "Index directory exists, skipping ingestion");
                return Ok(Self::open(dir, embedder).await?);
            }
            info!(dir = %dir.display(), "Removing existing index");
            tokio::fs::remove_dir_all(dir).await.map_err(|e| {
                RetrievalError::Storage(format!("Failed to remove {}: {e}", dir.display()))
            })?;
        }

        let chunks = ingest_document(document, splitter).await?;
        let source = document.display().to_string();
        Ok(Self::build(dir, chunks, &source, embedder).await?)
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rank stored chunks against an already computed query embedding.
    pub fn search_by_embedding(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Vec<RetrievedChunk> {
        let candidates = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| filter.is_none_or(|f| f.matches(&e.chunk)))
            .map(|(i, e)| (i, e.embedding.as_slice()));

        rank_by_similarity(candidates, query_embedding, k)
            .into_iter()
            .enumerate()
            .map(|(rank, (i, score))| RetrievedChunk::from_chunk(&self.entries[i].chunk, rank, score))
            .collect()
    }
}

#[async_trait]
impl VectorStore for VectorIndex {
    fn name(&self) -> &str {
        "local"
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed_query(query).await?;
        let results = self.search_by_embedding(&query_embedding, k, filter);

        debug!(
            k,
            filtered = filter.is_some(),
            results = results.len(),
            "Similarity search"
        );
        Ok(results)
    }

    async fn count(&self) -> Result<usize, RetrievalError> {
        Ok(self.entries.len())
    }
}

async fn persist(
    dir: &Path,
    manifest: &IndexManifest,
    entries: &[IndexedChunk],
) -> Result<(), RetrievalError> {
    let storage = |e: std::io::Error| RetrievalError::Storage(format!("Failed to write index: {e}"));

    let mut partial = dir.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    if partial.exists() {
        tokio::fs::remove_dir_all(&partial).await.map_err(storage)?;
    }
    tokio::fs::create_dir_all(&partial).await.map_err(storage)?;

    let mut content = String::new();
    for entry in entries {
        let line = serde_json::to_string(entry)
            .map_err(|e| RetrievalError::Storage(format!("Failed to serialize chunk: {e}")))?;
        content.push_str(&line);
        content.push('\n');
    }
    tokio::fs::write(partial.join(CHUNKS_FILE), content)
        .await
        .map_err(storage)?;

    let manifest_json = serde_json::to_string_pretty(manifest)
        .map_err(|e| RetrievalError::Storage(format!("Failed to serialize manifest: {e}")))?;
    tokio::fs::write(partial.join(MANIFEST_FILE), manifest_json)
        .await
        .map_err(storage)?;

    tokio::fs::rename(&partial, dir).await.map_err(storage)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HashEmbeddingProvider;
    use pagewise_core::filter::Comparator;
    use std::sync::Arc;

    fn embedder() -> Embedder {
        Embedder::new(Arc::new(HashEmbeddingProvider), "hash-embed").with_batch_size(2)
    }

    fn chunk(page: u32, content: &str) -> Chunk {
        Chunk {
            id: format!("c{page}"),
            content: content.into(),
            page,
            start_index: 0,
            source: "mdr.txt".into(),
        }
    }

    fn sample_chunks() -> Vec<Chunk> {
        vec![
            chunk(0, "Regulation on medical devices and their placing on the market"),
            chunk(1, "Notified bodies assess conformity of devices"),
            chunk(2, "Clinical evaluation and clinical investigations"),
            chunk(3, "Vigilance and post-market surveillance of medical devices"),
        ]
    }

    #[tokio::test]
    async fn build_then_search_ranks_by_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("db");
        let index = VectorIndex::build(&db, sample_chunks(), "mdr.txt", embedder())
            .await
            .unwrap();

        let results = index.search("clinical investigations", 2, None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].page, 2);
        assert_eq!(results[0].rank, 0);
        assert_eq!(results[1].rank, 1);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn reopen_yields_same_chunks_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("db");
        let built = VectorIndex::build(&db, sample_chunks(), "mdr.txt", embedder())
            .await
            .unwrap();
        let before = built.search("medical devices market", 4, None).await.unwrap();

        assert!(db.join(MANIFEST_FILE).exists());
        assert!(!db.with_extension("partial").exists());

        let reopened = VectorIndex::open(&db, embedder()).await.unwrap();
        assert_eq!(reopened.len(), 4);
        assert_eq!(reopened.manifest().embedding_model, "hash-embed");
        let after = reopened.search("medical devices market", 4, None).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn filter_applies_before_ranking() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::build(&dir.path().join("db"), sample_chunks(), "mdr.txt", embedder())
            .await
            .unwrap();

        let filter = MetadataFilter::comparison(Comparator::Gte, "page", 3);
        let results = index
            .search("clinical investigations", 3, Some(&filter))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].page, 3);
    }

    #[tokio::test]
    async fn open_rejects_other_embedding_model() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("db");
        VectorIndex::build(&db, sample_chunks(), "mdr.txt", embedder())
            .await
            .unwrap();

        let other = Embedder::new(Arc::new(HashEmbeddingProvider), "other-model");
        let err = VectorIndex::open(&db, other).await.unwrap_err();
        assert!(err.to_string().contains("other-model"));
    }

    #[tokio::test]
    async fn corrupted_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("db");
        VectorIndex::build(&db, sample_chunks(), "mdr.txt", embedder())
            .await
            .unwrap();

        let path = db.join(CHUNKS_FILE);
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{not json\n");
        std::fs::write(&path, content).unwrap();

        let index = VectorIndex::open(&db, embedder()).await.unwrap();
        assert_eq!(index.len(), 4);
    }

    #[tokio::test]
    async fn open_or_build_skips_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("db");
        let doc = dir.path().join("mdr.txt");
        std::fs::write(&doc, "Medical devices regulation.\u{c}Annex I safety requirements.").unwrap();

        let splitter = RecursiveSplitter::default();
        let first = VectorIndex::open_or_build(&db, &doc, &splitter, embedder(), false)
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        // The document changes but the existing index is reused.
        std::fs::write(&doc, "Completely different text.").unwrap();
        let second = VectorIndex::open_or_build(&db, &doc, &splitter, embedder(), false)
            .await
            .unwrap();
        assert_eq!(second.len(), 2);

        let rebuilt = VectorIndex::open_or_build(&db, &doc, &splitter, embedder(), true)
            .await
            .unwrap();
        assert_eq!(rebuilt.len(), 1);
    }

    #[tokio::test]
    async fn empty_results_are_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::build(&dir.path().join("db"), sample_chunks(), "mdr.txt", embedder())
            .await
            .unwrap();
        let filter = MetadataFilter::comparison(Comparator::Eq, "page", 99);
        let results = index.search("anything", 5, Some(&filter)).await.unwrap();
        assert!(results.is_empty());
    }
}
