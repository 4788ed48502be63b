//! Thin prompt-level client over a `Provider`.
//!
//! The engine speaks in prompts, optional system text and prior turns; this
//! client turns those into a `ProviderRequest` with the configured model.

use std::sync::Arc;
use timegraph_core::error::ProviderError;
use timegraph_core::message::Message;
use timegraph_core::provider::{Provider, ProviderRequest};

/// Per-call overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallParams {
    pub json_mode: bool,
    pub max_tokens: Option<u32>,
}

impl CallParams {
    pub fn json() -> Self {
        Self {
            json_mode: true,
            max_tokens: None,
        }
    }
}

#[derive(Clone)]
pub struct LlmClient {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.0,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `prompt` after the optional system text and prior turns.
    pub async fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
        history: &[Message],
        params: CallParams,
    ) -> Result<String, ProviderError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(system) = system {
            messages.push(Message::system(system));
        }
        messages.extend_from_slice(history);
        messages.push(Message::user(prompt));

        let mut request = ProviderRequest::new(self.model.clone(), messages);
        request.temperature = self.temperature;
        request.max_tokens = params.max_tokens.or(self.max_tokens);
        request.json_mode = params.json_mode;

        let response = self.provider.complete(request).await?;
        Ok(response.message.content)
    }

    /// Single-turn prompt with default parameters.
    pub async fn ask(&self, prompt: &str) -> Result<String, ProviderError> {
        self.complete(prompt, None, &[], CallParams::default()).await
    }
}
