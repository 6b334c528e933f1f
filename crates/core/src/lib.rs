//! # Pagewise Core
//!
//! Domain types, traits, and error definitions for the Pagewise document
//! chatbot. This crate has **zero framework dependencies**; it defines the
//! domain model that all other crates implement against.
//!
//! Every collaborator boundary (LLM provider, vector store) is a trait
//! here. Implementations live in their own crates; tests use scripted
//! stand-ins.

pub mod document;
pub mod error;
pub mod filter;
pub mod message;
pub mod params;
pub mod provider;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use document::{Chunk, RetrievedChunk};
pub use error::{Error, Result};
pub use filter::{AttributeInfo, Comparator, MetadataFilter};
pub use message::{ChatHistory, ChatTurn, Message, Role, SessionId, TurnRole};
pub use params::LlmParameters;
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk};
pub use store::VectorStore;
