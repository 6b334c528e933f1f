//! Events emitted while a streamed answer is generated.
//!
//! The gateway forwards these to clients over SSE, using
//! [`PipelineStreamEvent::event_type`] as the event name.

use crate::session::ReplyStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineStreamEvent {
    /// Partial answer text.
    Chunk { content: String },

    /// The turn is recorded.
    Done {
        session_id: String,
        status: ReplyStatus,
        sources_index: Option<usize>,
        retrieval_query: Option<String>,
    },

    /// Generation broke off after part of the answer was sent.
    Error { message: String },
}

impl PipelineStreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}
