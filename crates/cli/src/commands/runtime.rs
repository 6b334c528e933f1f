//! Setup shared by the commands: config, provider, index, sessions.

use anyhow::{Context, bail};
use pagewise_config::AppConfig;
use pagewise_core::provider::Provider;
use pagewise_pipeline::{PipelineVariant, SessionFactory};
use pagewise_providers::ProviderRouter;
use pagewise_store::{Embedder, RecursiveSplitter, VectorIndex};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// The config file used when `--config` is not given.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<AppConfig> {
    let path = config_path(explicit);
    AppConfig::load_with_env(&path).with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Fail early with setup instructions when no API key is available.
pub fn require_api_key(config: &AppConfig) -> anyhow::Result<()> {
    if config.has_api_key() || config.default_provider == "ollama" {
        return Ok(());
    }
    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    PAGEWISE_API_KEY=...   (any provider)");
    eprintln!("    GEMINI_API_KEY=...     (Google Gemini, the default)");
    eprintln!("    OPENAI_API_KEY=...     (OpenAI)");
    eprintln!();
    eprintln!("  Or add `api_key` to {}", config_path(None).display());
    eprintln!();
    bail!("No API key found. See above for setup instructions.")
}

fn provider(router: &ProviderRouter, name: &str) -> anyhow::Result<Arc<dyn Provider>> {
    router
        .get(name)
        .with_context(|| format!("Provider '{name}' is not configured"))
}

pub fn embedder(config: &AppConfig, router: &ProviderRouter) -> anyhow::Result<Embedder> {
    let provider = provider(router, config.embedding_provider())?;
    Ok(Embedder::new(provider, &config.index.embedding_model).with_batch_size(config.index.batch_size))
}

/// Open the index, building it from the configured document first when it
/// does not exist yet (or when `force` is set).
pub async fn open_index(
    config: &AppConfig,
    router: &ProviderRouter,
    force: bool,
) -> anyhow::Result<VectorIndex> {
    let splitter = RecursiveSplitter::new(config.document.chunk_size, config.document.chunk_overlap);
    let index = VectorIndex::open_or_build(
        Path::new(&config.index.persist_dir),
        Path::new(&config.document.path),
        &splitter,
        embedder(config, router)?,
        force,
    )
    .await
    .with_context(|| format!("Failed to prepare the index of {}", config.document.path.display()))?;
    Ok(index)
}

/// Everything a session needs: the shared index and the chat provider.
pub async fn session_factory(config: &AppConfig) -> anyhow::Result<SessionFactory> {
    require_api_key(config)?;
    let router = pagewise_providers::build_from_config(config);
    let index = open_index(config, &router, false).await?;
    let chat_provider = provider(&router, &config.default_provider)?;
    info!(
        chunks = index.len(),
        provider = %config.default_provider,
        model = %config.default_model,
        "Session factory ready"
    );
    Ok(SessionFactory::from_app_config(config, Arc::new(index), chat_provider)?)
}

pub fn parse_variant(variant: Option<&str>, factory: &SessionFactory) -> anyhow::Result<PipelineVariant> {
    match variant {
        Some(v) => Ok(v.parse()?),
        None => Ok(factory.default_variant()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_config_path_wins() {
        let path = config_path(Some(Path::new("/tmp/pagewise.toml")));
        assert_eq!(path, PathBuf::from("/tmp/pagewise.toml"));
        assert!(config_path(None).ends_with(".pagewise/config.toml"));
    }

    #[test]
    fn missing_api_key_is_reported() {
        assert!(require_api_key(&AppConfig::default()).is_err());

        let mut ollama = AppConfig::default();
        ollama.default_provider = "ollama".into();
        assert!(require_api_key(&ollama).is_ok());
    }
}
