//! The answering pipeline.
//!
//! One `invoke(question, history)` contract over two variants:
//!
//! - **basic**: retrieve → format → prompt → generate, searching with the
//!   raw question.
//! - **upgraded**: rewrite → retrieve → format → prompt → generate. The
//!   rewritten standalone query is used for retrieval *and* fills the
//!   question slot of the prompt. Retrieval may infer a metadata filter
//!   (self-query).
//!
//! The pipeline keeps the chunks and query of its latest invocation so the
//! front end can show sources.

use crate::llm::LlmClient;
use crate::prompt::{DEFAULT_CONTEXT_TEMPLATE, DEFAULT_SYSTEM_TEMPLATE, PromptAssembler};
use crate::retrieval::{RetrievalMode, Retriever};
use crate::rewriter::QueryRewriter;
use crate::self_query::SelfQuerySchema;
use pagewise_core::document::RetrievedChunk;
use pagewise_core::error::{Error, PromptError, ProviderError, ValidationError};
use pagewise_core::message::{ChatHistory, Message};
use pagewise_core::params::LlmParameters;
use pagewise_core::provider::StreamChunk;
use pagewise_core::store::VectorStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineVariant {
    Basic,
    Upgraded,
}

impl PipelineVariant {
    /// Chunks retrieved per turn unless configured otherwise.
    pub fn default_k(self) -> usize {
        match self {
            PipelineVariant::Basic => 3,
            PipelineVariant::Upgraded => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineVariant::Basic => "basic",
            PipelineVariant::Upgraded => "upgraded",
        }
    }

    /// The stages run by this variant, in order.
    pub fn stages(self) -> &'static [Stage] {
        match self {
            PipelineVariant::Basic => &[Stage::Retrieve, Stage::Format, Stage::Prompt, Stage::Generate],
            PipelineVariant::Upgraded => &[
                Stage::Rewrite,
                Stage::Retrieve,
                Stage::Format,
                Stage::Prompt,
                Stage::Generate,
            ],
        }
    }
}

impl std::fmt::Display for PipelineVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PipelineVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(PipelineVariant::Basic),
            "upgraded" => Ok(PipelineVariant::Upgraded),
            other => Err(Error::Config {
                message: format!("Unknown pipeline variant '{other}' (expected basic or upgraded)"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Rewrite,
    Retrieve,
    Format,
    Prompt,
    Generate,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Rewrite => "rewrite",
            Stage::Retrieve => "retrieve",
            Stage::Format => "format",
            Stage::Prompt => "prompt",
            Stage::Generate => "generate",
        }
    }
}

/// Templates and retrieval settings of a pipeline. Fixed once the pipeline
/// is built.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub variant: PipelineVariant,
    pub system_template: String,
    pub context_template: String,
    /// `None` uses the variant default
    pub retrieval_k: Option<usize>,
    /// Self-query schema for the upgraded variant; `None` disables filtering
    pub self_query: Option<SelfQuerySchema>,
}

impl PipelineConfig {
    pub fn basic() -> Self {
        Self {
            variant: PipelineVariant::Basic,
            system_template: DEFAULT_SYSTEM_TEMPLATE.into(),
            context_template: DEFAULT_CONTEXT_TEMPLATE.into(),
            retrieval_k: None,
            self_query: None,
        }
    }

    pub fn upgraded(content_description: impl Into<String>) -> Self {
        Self {
            variant: PipelineVariant::Upgraded,
            self_query: Some(SelfQuerySchema::pages(content_description)),
            ..Self::basic()
        }
    }

    pub fn from_app_config(config: &pagewise_config::AppConfig) -> pagewise_core::Result<Self> {
        let variant: PipelineVariant = config.pipeline.variant.parse()?;
        let pipeline = &config.pipeline;

        Ok(Self {
            variant,
            system_template: pipeline
                .system_prompt_override
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_TEMPLATE.into()),
            context_template: pipeline
                .context_template_override
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTEXT_TEMPLATE.into()),
            retrieval_k: pipeline.retrieval_k,
            self_query: pipeline
                .self_query
                .then(|| SelfQuerySchema::pages(&config.document.description)),
        })
    }

    pub fn with_variant(mut self, variant: PipelineVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_retrieval_k(mut self, k: usize) -> Self {
        self.retrieval_k = Some(k);
        self
    }

    pub fn effective_k(&self) -> usize {
        self.retrieval_k.unwrap_or(self.variant.default_k()).max(1)
    }

    fn retrieval_mode(&self) -> RetrievalMode {
        match (&self.variant, &self.self_query) {
            (PipelineVariant::Upgraded, Some(schema)) => RetrievalMode::SelfQuery(schema.clone()),
            _ => RetrievalMode::Similarity,
        }
    }
}

/// A generated answer arriving as text fragments in generation order.
///
/// Finite and not restartable.
pub struct AnswerStream {
    rx: mpsc::Receiver<Result<StreamChunk, ProviderError>>,
    finished: bool,
}

impl AnswerStream {
    /// The next non-empty fragment, or `None` once the answer is complete.
    pub async fn next_fragment(&mut self) -> Option<Result<String, ProviderError>> {
        while !self.finished {
            match self.rx.recv().await {
                None => self.finished = true,
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                Some(Ok(chunk)) => {
                    if chunk.done {
                        self.finished = true;
                    }
                    if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                        return Some(Ok(content));
                    }
                }
            }
        }
        None
    }

    /// Drain the stream into one string.
    pub async fn collect_text(mut self) -> Result<String, ProviderError> {
        let mut text = String::new();
        while let Some(fragment) = self.next_fragment().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

pub struct AnsweringPipeline {
    config: PipelineConfig,
    assembler: PromptAssembler,
    rewriter: QueryRewriter,
    retriever: Retriever,
    llm: LlmClient,
    last_sources: Vec<RetrievedChunk>,
    last_query: Option<String>,
}

impl AnsweringPipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn VectorStore>,
        llm: LlmClient,
    ) -> Result<Self, PromptError> {
        let assembler = PromptAssembler::new(&config.system_template, &config.context_template)?;
        let retriever = Retriever::new(store, config.effective_k(), config.retrieval_mode());

        Ok(Self {
            config,
            assembler,
            rewriter: QueryRewriter::new(),
            retriever,
            llm,
            last_sources: Vec::new(),
            last_query: None,
        })
    }

    pub fn variant(&self) -> PipelineVariant {
        self.config.variant
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn llm_parameters(&self) -> LlmParameters {
        self.llm.params()
    }

    /// Validate and bind new sampling parameters.
    ///
    /// Out-of-range values are rejected, never clamped, and the previous
    /// parameters stay in effect. On success the next invocation uses a new
    /// client.
    pub fn set_llm_parameters(
        &mut self,
        temperature: f32,
        top_k: u32,
        top_p: f32,
    ) -> Result<(), ValidationError> {
        let params = LlmParameters::new(temperature, top_k, top_p)?;
        self.apply_parameters(params);
        Ok(())
    }

    /// Bind an already validated parameter set.
    pub fn apply_parameters(&mut self, params: LlmParameters) {
        self.llm = self.llm.with_parameters(params);
        debug!(
            temperature = params.temperature(),
            top_k = params.top_k(),
            top_p = params.top_p(),
            "LLM parameters updated"
        );
    }

    /// Chunks retrieved by the latest invocation.
    pub fn last_sources(&self) -> &[RetrievedChunk] {
        &self.last_sources
    }

    /// Query used for retrieval by the latest invocation.
    pub fn last_query(&self) -> Option<&str> {
        self.last_query.as_deref()
    }

    /// Answer `question`. The returned text may be empty; callers decide
    /// what to show instead.
    pub async fn invoke(&mut self, question: &str, history: &ChatHistory) -> pagewise_core::Result<String> {
        let messages = self.prepare(question, history).await?;
        debug!(stage = Stage::Generate.as_str(), "Pipeline stage");
        let answer = self.llm.generate(messages).await?;
        info!(
            variant = %self.config.variant,
            sources = self.last_sources.len(),
            answer_len = answer.len(),
            "Answer generated"
        );
        Ok(answer)
    }

    /// Like [`invoke`](Self::invoke) but streams the generated answer.
    pub async fn invoke_stream(
        &mut self,
        question: &str,
        history: &ChatHistory,
    ) -> pagewise_core::Result<AnswerStream> {
        let messages = self.prepare(question, history).await?;
        debug!(stage = Stage::Generate.as_str(), streaming = true, "Pipeline stage");
        let rx = self.llm.stream(messages).await?;
        Ok(AnswerStream {
            rx,
            finished: false,
        })
    }

    /// Run the variant's stages up to generation and return the assembled
    /// prompt.
    async fn prepare(&mut self, question: &str, history: &ChatHistory) -> pagewise_core::Result<Vec<Message>> {
        self.last_sources.clear();
        self.last_query = None;

        let mut query = question.to_string();
        let mut context = String::new();
        let mut messages = Vec::new();

        for &stage in self.config.variant.stages() {
            match stage {
                Stage::Rewrite => {
                    debug!(stage = stage.as_str(), "Pipeline stage");
                    query = self.rewriter.rewrite(&self.llm, question, history).await?;
                }
                Stage::Retrieve => {
                    debug!(stage = stage.as_str(), query = %query, "Pipeline stage");
                    let retrieval = self.retriever.retrieve(&query, &self.llm).await?;
                    self.last_sources = retrieval.chunks;
                    self.last_query = Some(query.clone());
                }
                Stage::Format => {
                    debug!(stage = stage.as_str(), chunks = self.last_sources.len(), "Pipeline stage");
                    context = self.assembler.format_context(&self.last_sources)?;
                }
                Stage::Prompt => {
                    debug!(stage = stage.as_str(), "Pipeline stage");
                    messages = self.assembler.assemble(&context, &query, history)?;
                }
                // Run by the caller, blocking or streaming.
                Stage::Generate => break,
            }
        }
        Ok(messages)
    }
}

impl std::fmt::Debug for AnsweringPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnsweringPipeline")
            .field("variant", &self.config.variant)
            .field("retriever", &self.retriever)
            .field("llm", &self.llm)
            .finish()
    }
}
