//! Configuration loading, validation, and management for Pagewise.
//!
//! Loads configuration from `~/.pagewise/config.toml` (or an explicit path)
//! with environment variable overrides. Validates all settings at startup.

use pagewise_core::LlmParameters;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Pipeline variants accepted in `pipeline.variant`.
pub const PIPELINE_VARIANTS: &[&str] = &["basic", "upgraded"];

/// The root configuration structure.
///
/// Maps directly to `~/.pagewise/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default chat model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Initial sampling parameters of a new session
    #[serde(default)]
    pub llm: LlmConfig,

    /// Source document and chunking policy
    #[serde(default)]
    pub document: DocumentConfig,

    /// Vector index configuration
    #[serde(default)]
    pub index: IndexConfig,

    /// Answering pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "gemini".into()
}
fn default_model() -> String {
    "gemini-1.5-flash".into()
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("llm", &self.llm)
            .field("document", &self.document)
            .field("index", &self.index)
            .field("pipeline", &self.pipeline)
            .field("gateway", &self.gateway)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_k")]
    pub top_k: u32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

fn default_temperature() -> f32 {
    1.0
}
fn default_top_k() -> u32 {
    10
}
fn default_top_p() -> f32 {
    0.9
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_k: default_top_k(),
            top_p: default_top_p(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// The document to answer questions about (`.pdf` or `.txt`)
    #[serde(default = "default_document_path")]
    pub path: PathBuf,

    /// One-line description of the document, shown to the self-query LLM
    #[serde(default = "default_document_description")]
    pub description: String,

    /// Target chunk size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared between adjacent chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_document_path() -> PathBuf {
    PathBuf::from("document.pdf")
}
fn default_document_description() -> String {
    "Medical devices regulation".into()
}
fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            path: default_document_path(),
            description: default_document_description(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory the index is persisted to; its existence skips re-indexing
    #[serde(default = "default_persist_dir")]
    pub persist_dir: PathBuf,

    /// Provider used for embeddings (defaults to `default_provider`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Texts per embedding request during ingestion
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_persist_dir() -> PathBuf {
    PathBuf::from("db")
}
fn default_embedding_model() -> String {
    "text-embedding-004".into()
}
fn default_batch_size() -> usize {
    64
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            persist_dir: default_persist_dir(),
            embedding_provider: None,
            embedding_model: default_embedding_model(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// "basic" or "upgraded"
    #[serde(default = "default_variant")]
    pub variant: String,

    /// Chunks retrieved per turn (defaults: basic 3, upgraded 5)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_k: Option<usize>,

    /// Let the upgraded pipeline infer metadata filters
    #[serde(default = "default_true")]
    pub self_query: bool,

    /// Replace the built-in system instruction (must contain `{context}`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_override: Option<String>,

    /// Replace the per-chunk context template (`{page}`, `{content}`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_template_override: Option<String>,
}

fn default_variant() -> String {
    "upgraded".into()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            variant: default_variant(),
            retrieval_k: None,
            self_query: true,
            system_prompt_override: None,
            context_template_override: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Sessions kept in memory before the oldest is evicted
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_max_sessions() -> usize {
    1_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            max_sessions: default_max_sessions(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.pagewise/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `PAGEWISE_API_KEY` (highest priority)
    /// - `GEMINI_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from `path`, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("PAGEWISE_API_KEY")
                .ok()
                .or_else(|| std::env::var("GEMINI_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("PAGEWISE_PROVIDER") {
            config.default_provider = provider;
        }

        if let Ok(model) = std::env::var("PAGEWISE_MODEL") {
            config.default_model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".pagewise")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        self.llm_parameters()?;

        if self.document.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "document.chunk_size must be > 0".into(),
            ));
        }

        if self.document.chunk_overlap >= self.document.chunk_size {
            return Err(ConfigError::ValidationError(format!(
                "document.chunk_overlap ({}) must be smaller than document.chunk_size ({})",
                self.document.chunk_overlap, self.document.chunk_size
            )));
        }

        if self.pipeline.retrieval_k == Some(0) {
            return Err(ConfigError::ValidationError(
                "pipeline.retrieval_k must be >= 1".into(),
            ));
        }

        if !PIPELINE_VARIANTS.contains(&self.pipeline.variant.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "pipeline.variant must be one of {:?}, got '{}'",
                PIPELINE_VARIANTS, self.pipeline.variant
            )));
        }

        if let Some(system) = &self.pipeline.system_prompt_override {
            if !system.contains("{context}") {
                return Err(ConfigError::ValidationError(
                    "pipeline.system_prompt_override must contain a {context} slot".into(),
                ));
            }
        }

        if self.index.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "index.batch_size must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// The initial sampling parameters, validated.
    pub fn llm_parameters(&self) -> Result<LlmParameters, ConfigError> {
        LlmParameters::new(self.llm.temperature, self.llm.top_k, self.llm.top_p)
            .map_err(|e| ConfigError::ValidationError(format!("llm: {e}")))
    }

    /// The provider used for embeddings.
    pub fn embedding_provider(&self) -> &str {
        self.index
            .embedding_provider
            .as_deref()
            .unwrap_or(&self.default_provider)
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
            || self
                .providers
                .get(&self.default_provider)
                .is_some_and(|p| p.api_key.is_some())
    }

    /// Generate a default config TOML string (for `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_max_tokens: default_max_tokens(),
            llm: LlmConfig::default(),
            document: DocumentConfig::default(),
            index: IndexConfig::default(),
            pipeline: PipelineConfig::default(),
            gateway: GatewayConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.default_provider, "gemini");
        assert_eq!(config.document.chunk_size, 1000);
        assert_eq!(config.document.chunk_overlap, 200);
        assert_eq!(config.index.persist_dir, PathBuf::from("db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_provider, config.default_provider);
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.pipeline.variant, "upgraded");
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            llm: LlmConfig {
                temperature: -1.0,
                ..LlmConfig::default()
            },
            ..AppConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let mut config = AppConfig::default();
        config.document.chunk_overlap = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_variant_rejected() {
        let mut config = AppConfig::default();
        config.pipeline.variant = "agentic".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn system_override_needs_context_slot() {
        let mut config = AppConfig::default();
        config.pipeline.system_prompt_override = Some("Answer briefly.".into());
        assert!(config.validate().is_err());

        config.pipeline.system_prompt_override = Some("Use this: {context}".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        let config = result.unwrap();
        assert_eq!(config.default_model, "gemini-1.5-flash");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            tmp,
            r#"
default_provider = "openai"
default_model = "gpt-4o-mini"

[pipeline]
variant = "basic"
retrieval_k = 4

[index]
embedding_model = "text-embedding-3-small"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(tmp.path()).unwrap();
        assert_eq!(config.default_provider, "openai");
        assert_eq!(config.pipeline.variant, "basic");
        assert_eq!(config.pipeline.retrieval_k, Some(4));
        assert_eq!(config.index.persist_dir, PathBuf::from("db"));
        assert_eq!(config.embedding_provider(), "openai");
    }

    #[test]
    fn parse_error_reports_path() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "default_provider = [").unwrap();
        let err = AppConfig::load_from(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gemini"));
        assert!(toml_str.contains("chunk_overlap"));
    }
}
