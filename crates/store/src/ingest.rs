//! Document ingestion: load pages, split them into chunks.

use crate::loader::{Page, load_pages};
use crate::splitter::RecursiveSplitter;
use pagewise_core::document::Chunk;
use pagewise_core::error::IngestError;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Load `path` and split every page into chunks, in page order.
pub async fn ingest_document(
    path: &Path,
    splitter: &RecursiveSplitter,
) -> Result<Vec<Chunk>, IngestError> {
    let pages = load_pages(path).await?;
    let source = path.display().to_string();
    let chunks = chunk_pages(&pages, &source, splitter);

    if chunks.is_empty() {
        return Err(IngestError::EmptyDocument(source));
    }

    info!(
        source = %source,
        pages = pages.len(),
        chunks = chunks.len(),
        chunk_size = splitter.chunk_size(),
        chunk_overlap = splitter.chunk_overlap(),
        "Document ingested"
    );
    Ok(chunks)
}

/// Split pages into chunks tagged with page number and start offset.
pub fn chunk_pages(pages: &[Page], source: &str, splitter: &RecursiveSplitter) -> Vec<Chunk> {
    pages
        .iter()
        .flat_map(|page| {
            splitter
                .split_with_offsets(&page.text)
                .into_iter()
                .map(move |span| Chunk {
                    id: Uuid::new_v4().to_string(),
                    content: span.text,
                    page: page.number,
                    start_index: span.start_index,
                    source: source.to_string(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_keep_page_numbers() {
        let pages = vec![
            Page { number: 0, text: "Cover page".into() },
            Page { number: 1, text: String::new() },
            Page { number: 2, text: "Article 1\n\nThis Regulation lays down rules.".into() },
        ];
        let splitter = RecursiveSplitter::new(20, 0);
        let chunks = chunk_pages(&pages, "mdr.pdf", &splitter);

        assert_eq!(chunks[0].page, 0);
        assert!(chunks.iter().all(|c| c.page != 1));
        assert!(chunks.iter().filter(|c| c.page == 2).count() >= 2);
        assert!(chunks.iter().all(|c| c.source == "mdr.pdf"));
    }

    #[tokio::test]
    async fn ingest_text_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mdr.txt");
        std::fs::write(
            &path,
            "Regulation (EU) 2017/745 on medical devices.\u{c}Article 2 Definitions.",
        )
        .unwrap();

        let chunks = ingest_document(&path, &RecursiveSplitter::default()).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].page, 1);
        assert_eq!(chunks[1].start_index, 0);
    }
}
