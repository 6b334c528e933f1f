//! Chat sessions: the state one user's conversation owns.
//!
//! A session holds its chat history, the answering pipeline, the sampling
//! settings chosen by the user, and one sources entry per answered turn.
//! Turns are processed one at a time through `&mut self`.

use crate::llm::LlmClient;
use crate::pipeline::{AnsweringPipeline, PipelineConfig, PipelineVariant};
use crate::stream_event::PipelineStreamEvent;
use chrono::{DateTime, Utc};
use pagewise_core::document::RetrievedChunk;
use pagewise_core::error::{Error, PromptError, ValidationError};
use pagewise_core::message::{ChatHistory, SessionId};
use pagewise_core::params::LlmParameters;
use pagewise_core::provider::Provider;
use pagewise_core::store::VectorStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Shown instead of an empty or failed generation.
pub const FALLBACK_MESSAGE: &str = "It seems that the LLM model is not able to generate a response for this question.\n\
It may be because of **API limits**. Please try waiting one minute, or asking it in another way.";

pub const WELCOME_MESSAGE: &str = "# Welcome to the RAG chatbot that helps you understand MDR\n\
This model is designed to assist you in searching and understanding **medical devices regulation**. \
You can also adjust the model's settings to customize its behavior.";

/// How a turn's answer came about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplyStatus {
    Answered,
    /// The LLM returned nothing; the fallback message was shown.
    EmptyGeneration,
    /// The LLM or the index failed; the fallback message was shown.
    GenerationFailed { reason: String },
}

impl ReplyStatus {
    pub fn used_fallback(&self) -> bool {
        !matches!(self, ReplyStatus::Answered)
    }
}

/// The result of one chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub content: String,
    pub status: ReplyStatus,
    /// Index of the sources entry registered for this turn
    pub sources_index: Option<usize>,
    /// Query the pipeline searched with
    pub retrieval_query: Option<String>,
}

/// Sources of one answer, hidden until toggled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesEntry {
    pub chunks: Vec<RetrievedChunk>,
    pub shown: bool,
}

impl SourcesEntry {
    /// Markdown listing of the chunks with their 1-based pages.
    pub fn render(&self) -> String {
        let lines = self
            .chunks
            .iter()
            .map(|c| format!("- ***Page {}**: \"{}\"*", c.display_page(), c.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        format!("\n\n---\n\n**Sources**\n{lines}")
    }
}

pub struct ChatSession {
    id: SessionId,
    history: ChatHistory,
    pipeline: AnsweringPipeline,
    settings: LlmParameters,
    needs_settings_update: bool,
    sources: Vec<SourcesEntry>,
    created_at: DateTime<Utc>,
}

impl ChatSession {
    /// Start a session; `settings` are applied before the first message.
    pub fn new(pipeline: AnsweringPipeline, settings: LlmParameters) -> Self {
        let id = SessionId::new();
        Self {
            history: ChatHistory::for_session(id.clone()),
            id,
            pipeline,
            settings,
            needs_settings_update: true,
            sources: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn settings(&self) -> LlmParameters {
        self.settings
    }

    pub fn variant(&self) -> PipelineVariant {
        self.pipeline.variant()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn welcome_message(&self) -> &'static str {
        WELCOME_MESSAGE
    }

    pub fn pipeline(&self) -> &AnsweringPipeline {
        &self.pipeline
    }

    pub fn sources(&self) -> &[SourcesEntry] {
        &self.sources
    }

    pub fn sources_entry(&self, index: usize) -> Option<&SourcesEntry> {
        self.sources.get(index)
    }

    /// Record new slider positions.
    ///
    /// Values are validated now and bound to the model at the next message.
    /// A rejected update leaves the current settings untouched.
    pub fn update_settings(
        &mut self,
        temperature: f64,
        top_k: f64,
        top_p: f64,
    ) -> Result<LlmParameters, ValidationError> {
        let params = LlmParameters::from_raw(temperature, top_k, top_p)?;
        self.settings = params;
        self.needs_settings_update = true;
        Ok(params)
    }

    fn apply_pending_settings(&mut self) {
        if self.needs_settings_update {
            self.pipeline.apply_parameters(self.settings);
            self.needs_settings_update = false;
        }
    }

    /// Flip the visibility of one answer's sources; returns the new state.
    pub fn toggle_sources(&mut self, index: usize) -> Option<bool> {
        let entry = self.sources.get_mut(index)?;
        entry.shown = !entry.shown;
        Some(entry.shown)
    }

    /// Process one user message and record the reply.
    pub async fn send_message(&mut self, text: &str) -> pagewise_core::Result<Reply> {
        self.apply_pending_settings();
        self.history.add_user_message(text);

        let outcome = self.pipeline.invoke(text, &self.history).await;
        let (content, status) = match outcome {
            Ok(answer) => substitute_empty(answer),
            Err(e) => self.fallback_or_close(e)?,
        };

        Ok(self.finish_turn(content, status))
    }

    /// Like [`send_message`](Self::send_message), forwarding the answer to
    /// `events` as it is generated, then a `done` event.
    ///
    /// The fragments sent always concatenate to the recorded answer. A
    /// closed receiver does not interrupt the turn.
    pub async fn send_message_streaming(
        &mut self,
        text: &str,
        events: &mpsc::Sender<PipelineStreamEvent>,
    ) -> pagewise_core::Result<Reply> {
        self.apply_pending_settings();
        self.history.add_user_message(text);

        let (content, status) = match self.pipeline.invoke_stream(text, &self.history).await {
            Err(e) => {
                let (content, status) = self.fallback_or_close(e)?;
                send(events, PipelineStreamEvent::Chunk { content: content.clone() }).await;
                (content, status)
            }
            Ok(mut stream) => {
                let mut answer = String::new();
                let mut failure = None;
                while let Some(fragment) = stream.next_fragment().await {
                    match fragment {
                        Ok(fragment) => {
                            answer.push_str(&fragment);
                            send(events, PipelineStreamEvent::Chunk { content: fragment }).await;
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }

                match failure {
                    Some(e) if answer.trim().is_empty() => {
                        let (content, status) = self.fallback_or_close(e.into())?;
                        send(events, PipelineStreamEvent::Chunk { content: content.clone() }).await;
                        (content, status)
                    }
                    Some(e) => {
                        warn!(error = %e, "Stream interrupted after partial answer");
                        send(events, PipelineStreamEvent::Error { message: e.to_string() }).await;
                        (answer, ReplyStatus::GenerationFailed { reason: e.to_string() })
                    }
                    None if answer.trim().is_empty() => {
                        send(events, PipelineStreamEvent::Chunk { content: FALLBACK_MESSAGE.into() }).await;
                        (FALLBACK_MESSAGE.to_string(), ReplyStatus::EmptyGeneration)
                    }
                    None => (answer, ReplyStatus::Answered),
                }
            }
        };

        let reply = self.finish_turn(content, status);
        send(
            events,
            PipelineStreamEvent::Done {
                session_id: self.id.to_string(),
                status: reply.status.clone(),
                sources_index: reply.sources_index,
                retrieval_query: reply.retrieval_query.clone(),
            },
        )
        .await;
        Ok(reply)
    }

    /// Map a pipeline error to the fallback reply. Errors that propagate
    /// still close the turn so the history keeps alternating.
    fn fallback_or_close(&mut self, e: Error) -> pagewise_core::Result<(String, ReplyStatus)> {
        fallback_for(e).inspect_err(|e| {
            error!(error = %e, "Turn aborted");
            self.history.add_ai_message(FALLBACK_MESSAGE);
        })
    }

    fn finish_turn(&mut self, content: String, status: ReplyStatus) -> Reply {
        self.history.add_ai_message(content.clone());

        let chunks = self.pipeline.last_sources();
        let sources_index = if chunks.is_empty() {
            None
        } else {
            self.sources.push(SourcesEntry {
                chunks: chunks.to_vec(),
                shown: false,
            });
            Some(self.sources.len() - 1)
        };

        info!(
            session = %self.id,
            turns = self.history.len(),
            fallback = status.used_fallback(),
            sources = chunks.len(),
            "Turn completed"
        );

        Reply {
            content,
            status,
            sources_index,
            retrieval_query: self.pipeline.last_query().map(String::from),
        }
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("id", &self.id)
            .field("turns", &self.history.len())
            .field("settings", &self.settings)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

fn substitute_empty(answer: String) -> (String, ReplyStatus) {
    if answer.trim().is_empty() {
        warn!("LLM returned an empty answer, showing fallback message");
        (FALLBACK_MESSAGE.to_string(), ReplyStatus::EmptyGeneration)
    } else {
        (answer, ReplyStatus::Answered)
    }
}

/// Provider and retrieval failures become the fallback message; anything
/// else is a bug in configuration and propagates.
fn fallback_for(e: Error) -> pagewise_core::Result<(String, ReplyStatus)> {
    match e {
        Error::Provider(_) | Error::Retrieval(_) => {
            error!(error = %e, "Generation failed, showing fallback message");
            Ok((
                FALLBACK_MESSAGE.to_string(),
                ReplyStatus::GenerationFailed {
                    reason: e.to_string(),
                },
            ))
        }
        other => Err(other),
    }
}

async fn send(events: &mpsc::Sender<PipelineStreamEvent>, event: PipelineStreamEvent) {
    // The turn completes even if nobody is listening anymore.
    let _ = events.send(event).await;
}

/// Builds sessions that share one index and one provider.
#[derive(Clone)]
pub struct SessionFactory {
    store: Arc<dyn VectorStore>,
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: Option<u32>,
    config: PipelineConfig,
    initial_settings: LlmParameters,
}

impl SessionFactory {
    pub fn new(
        store: Arc<dyn VectorStore>,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            provider,
            model: model.into(),
            max_tokens: None,
            config,
            initial_settings: LlmParameters::default(),
        }
    }

    pub fn from_app_config(
        app: &pagewise_config::AppConfig,
        store: Arc<dyn VectorStore>,
        provider: Arc<dyn Provider>,
    ) -> pagewise_core::Result<Self> {
        let config = PipelineConfig::from_app_config(app)?;
        let initial_settings = app.llm_parameters().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        Ok(Self::new(store, provider, &app.default_model, config)
            .with_initial_settings(initial_settings)
            .with_max_tokens(app.default_max_tokens))
    }

    pub fn with_initial_settings(mut self, settings: LlmParameters) -> Self {
        self.initial_settings = settings;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn default_variant(&self) -> PipelineVariant {
        self.config.variant
    }

    pub fn create(&self) -> Result<ChatSession, PromptError> {
        self.create_with_variant(self.config.variant)
    }

    pub fn create_with_variant(&self, variant: PipelineVariant) -> Result<ChatSession, PromptError> {
        let mut llm = LlmClient::new(Arc::clone(&self.provider), &self.model, self.initial_settings);
        if let Some(max_tokens) = self.max_tokens {
            llm = llm.with_max_tokens(max_tokens);
        }
        let config = self.config.clone().with_variant(variant);
        let pipeline = AnsweringPipeline::new(config, Arc::clone(&self.store), llm)?;
        Ok(ChatSession::new(pipeline, self.initial_settings))
    }
}
