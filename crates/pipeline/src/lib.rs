//! The question-answering pipeline of Pagewise.
//!
//! A turn flows through these stages:
//!
//! 1. **Rewrite** (upgraded variant only): turn a follow-up question into a
//!    standalone search query using the chat history
//! 2. **Retrieve** the most similar chunks, optionally restricted by a
//!    metadata filter the LLM infers (self-query)
//! 3. **Format** the chunks into a page-labelled context block
//! 4. **Prompt**: system instructions with the context, the question, then
//!    the chat history
//! 5. **Generate** the answer, complete or streamed
//!
//! [`ChatSession`] wraps a pipeline with history, settings, sources and the
//! fallback answer.

pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod retrieval;
pub mod rewriter;
pub mod self_query;
pub mod session;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use llm::LlmClient;
pub use pipeline::{AnswerStream, AnsweringPipeline, PipelineConfig, PipelineVariant, Stage};
pub use prompt::{PromptAssembler, PromptTemplate};
pub use retrieval::{Retrieval, RetrievalMode, Retriever};
pub use rewriter::QueryRewriter;
pub use self_query::{SelfQuerySchema, StructuredQuery};
pub use session::{
    ChatSession, FALLBACK_MESSAGE, Reply, ReplyStatus, SessionFactory, SourcesEntry,
    WELCOME_MESSAGE,
};
pub use stream_event::PipelineStreamEvent;
