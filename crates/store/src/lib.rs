//! Document ingestion and the persisted vector index for Pagewise.
//!
//! - `loader`: document → pages
//! - `splitter`: pages → overlapping chunks
//! - `embedder`: chunk and query embeddings via a `Provider`
//! - `index`: on-disk index implementing `VectorStore`

pub mod embedder;
pub mod index;
pub mod ingest;
pub mod loader;
pub mod splitter;
pub mod vector;

#[cfg(test)]
pub(crate) mod testing;

pub use embedder::Embedder;
pub use index::{IndexManifest, VectorIndex};
pub use ingest::{chunk_pages, ingest_document};
pub use loader::{Page, load_pages};
pub use splitter::{RecursiveSplitter, TextSpan};
