//! A stateless LLM client bound to one validated parameter set.

use pagewise_core::error::ProviderError;
use pagewise_core::message::Message;
use pagewise_core::params::LlmParameters;
use pagewise_core::provider::{Provider, ProviderRequest, StreamChunk};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Model + sampling parameters over a shared provider.
///
/// Changing parameters never mutates a client; [`LlmClient::with_parameters`]
/// returns a new one.
#[derive(Clone)]
pub struct LlmClient {
    provider: Arc<dyn Provider>,
    model: String,
    params: LlmParameters,
    max_tokens: Option<u32>,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, params: LlmParameters) -> Self {
        Self {
            provider,
            model: model.into(),
            params,
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// A new client over the same provider and model with other parameters.
    pub fn with_parameters(&self, params: LlmParameters) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            model: self.model.clone(),
            params,
            max_tokens: self.max_tokens,
        }
    }

    pub fn params(&self) -> LlmParameters {
        self.params
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn request(&self, messages: Vec<Message>, stream: bool) -> ProviderRequest {
        let mut request = ProviderRequest::new(&self.model, messages, &self.params);
        request.max_tokens = self.max_tokens;
        request.stream = stream;
        request
    }

    /// Generate a complete answer. The text may be empty.
    pub async fn generate(&self, messages: Vec<Message>) -> Result<String, ProviderError> {
        debug!(
            model = %self.model,
            messages = messages.len(),
            temperature = self.params.temperature(),
            top_k = self.params.top_k(),
            top_p = self.params.top_p(),
            "Generating"
        );
        let response = self.provider.complete(self.request(messages, false)).await?;
        Ok(response.message.content)
    }

    /// Generate an answer as a stream of chunks in generation order.
    pub async fn stream(
        &self,
        messages: Vec<Message>,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        self.provider.stream(self.request(messages, true)).await
    }
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("params", &self.params)
            .finish()
    }
}
