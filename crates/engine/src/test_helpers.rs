//! Shared test doubles for engine tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use timegraph_core::error::ProviderError;
use timegraph_core::message::Message;
use timegraph_core::provider::{Embedder, Provider, ProviderRequest, ProviderResponse, Usage};
use timegraph_providers::LlmClient;

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue; once the
/// queue is empty the `fallback` reply (if any) is returned forever.
/// Panics if more calls are made than responses provided and there is no
/// fallback.
pub struct SequentialMockProvider {
    responses: Mutex<VecDeque<String>>,
    fallback: Option<String>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn from_texts(texts: &[&str]) -> Self {
        Self {
            responses: Mutex::new(texts.iter().map(|t| t.to_string()).collect()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with `text`.
    pub fn repeating(text: &str) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: Some(text.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let text = match self.responses.lock().unwrap().pop_front() {
            Some(text) => text,
            None => self.fallback.clone().unwrap_or_else(|| {
                panic!(
                    "SequentialMockProvider: no more responses (call #{})",
                    requests.len()
                )
            }),
        };
        requests.push(request);
        Ok(make_text_response(&text))
    }
}

/// Answers by the first rule whose needle occurs in any message of the
/// request, falling back to a default reply.
///
/// Safe under concurrent fan-out, where call order is not deterministic.
pub struct RuleProvider {
    rules: Vec<(String, String)>,
    default: String,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl RuleProvider {
    pub fn new(default: &str) -> Self {
        Self {
            rules: Vec::new(),
            default: default.to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn when(mut self, needle: &str, reply: &str) -> Self {
        self.rules.push((needle.to_string(), reply.to_string()));
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for RuleProvider {
    fn name(&self) -> &str {
        "rule_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let prompt = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.default.clone());
        self.requests.lock().unwrap().push(request);
        Ok(make_text_response(&reply))
    }
}

/// Create a simple text response.
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

pub fn llm_client(provider: Arc<dyn Provider>) -> LlmClient {
    LlmClient::new(provider, "mock-model")
}

/// Bag-of-words embedder: each lower-cased word bumps one hashed bucket.
///
/// Texts sharing words get a positive cosine similarity; disjoint texts
/// are orthogonal.
pub struct KeywordEmbedder {
    dim: usize,
}

impl KeywordEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dim];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
            vector[bucket % self.dim] += 1.0;
        }
        vector
    }
}

impl Default for KeywordEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}
