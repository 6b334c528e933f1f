//! `pagewise ingest`: build the vector index of the configured document.

use super::runtime::{load_config, open_index, require_api_key};
use std::path::Path;

pub async fn run(explicit: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let config = load_config(explicit)?;
    require_api_key(&config)?;

    let router = pagewise_providers::build_from_config(&config);
    let index = open_index(&config, &router, force).await?;
    let manifest = index.manifest();

    println!("Index ready at {}", index.dir().display());
    println!("  Document:         {}", manifest.source);
    println!("  Chunks:           {}", manifest.chunk_count);
    println!("  Embedding model:  {}", manifest.embedding_model);
    println!("  Built:            {}", manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC"));

    Ok(())
}
