//! `pagewise status`: show configuration and index state.

use super::runtime::{config_path, load_config};
use pagewise_store::IndexManifest;
use std::path::Path;

pub async fn run(explicit: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(explicit)?;
    let path = config_path(explicit);
    let params = config.llm_parameters()?;

    println!("Pagewise status");
    println!("===============");
    println!("  Config file:   {}", path.display());
    println!("  Provider:      {}", config.default_provider);
    println!("  Model:         {}", config.default_model);
    println!("  API key:       {}", if config.has_api_key() { "set" } else { "missing" });
    println!(
        "  Sampling:      temperature {} / top_k {} / top_p {}",
        params.temperature(),
        params.top_k(),
        params.top_p()
    );
    println!("  Pipeline:      {}", config.pipeline.variant);
    println!("  Document:      {}", config.document.path.display());
    println!("  Gateway:       {}:{}", config.gateway.host, config.gateway.port);

    let index_dir = Path::new(&config.index.persist_dir);
    match IndexManifest::read(index_dir).await {
        Ok(manifest) => {
            println!("\n  Index:         {}", index_dir.display());
            println!("    chunks:      {}", manifest.chunk_count);
            println!("    embeddings:  {}", manifest.embedding_model);
            println!("    built:       {}", manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
            if manifest.embedding_model != config.index.embedding_model {
                println!("    WARNING: configured embedding model is {}; run `pagewise ingest --force`",
                    config.index.embedding_model);
            }
        }
        Err(_) if !index_dir.exists() => {
            println!("\n  Index:         not built yet (run `pagewise ingest`)");
        }
        Err(e) => println!("\n  Index:         unreadable ({e})"),
    }

    if !path.exists() {
        println!("\n  No config file, using defaults (run `pagewise init`)");
    }

    Ok(())
}
