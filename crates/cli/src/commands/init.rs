//! `pagewise init`: write a default configuration file.

use super::runtime::config_path;
use pagewise_config::AppConfig;
use std::path::Path;

pub async fn run(explicit: Option<&Path>) -> anyhow::Result<()> {
    let path = config_path(explicit);

    println!("Pagewise setup");
    println!("==============\n");

    if path.exists() {
        println!("Config already exists at: {}", path.display());
        println!("Edit it manually or delete it and re-run `pagewise init`.");
        return Ok(());
    }

    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(&path, AppConfig::default_toml()).await?;

    println!("Created {}", path.display());
    println!("\nNext steps:");
    println!("  1. Set GEMINI_API_KEY (or add api_key to the config file)");
    println!("  2. Point document.path at your PDF");
    println!("  3. Run: pagewise ingest");
    println!("  4. Run: pagewise chat\n");

    Ok(())
}
