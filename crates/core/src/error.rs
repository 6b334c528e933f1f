//! Error types for the Pagewise domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Pagewise operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Parameter validation ---
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // --- Retrieval / vector store errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Ingestion errors ---
    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    // --- Prompt templating ---
    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the error is a rejected setting rather than a failed call.
    ///
    /// Front ends use this to show "settings rejected" instead of
    /// "generation failed".
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// True when the error came from the LLM provider.
    pub fn is_generation_failure(&self) -> bool {
        matches!(self, Error::Provider(_))
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// A value was rejected before being bound to a model client.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{name} = {value} is out of range (expected {min} ..= {max})")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{name} must be a finite number")]
    NotFinite { name: &'static str },
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to convert {path} to text: {reason}")]
    Conversion { path: String, reason: String },

    #[error("Document {0} contains no text")]
    EmptyDocument(String),

    #[error("Unsupported document type: {0}")]
    UnsupportedFormat(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PromptError {
    #[error("Missing value for template variable '{0}'")]
    MissingVariable(String),
}
