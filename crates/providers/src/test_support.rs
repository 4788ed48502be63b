//! Provider doubles shared by this crate's tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use timegraph_core::error::ProviderError;
use timegraph_core::message::Message;
use timegraph_core::provider::*;

/// Always answers with the same text and counts calls.
pub struct CountingProvider {
    reply: String,
    calls: AtomicUsize,
}

impl CountingProvider {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for CountingProvider {
    fn name(&self) -> &str {
        "counting"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderResponse {
            message: Message::assistant(self.reply.clone()),
            usage: None,
            model: request.model,
        })
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EmbeddingResponse {
            embeddings: request
                .inputs
                .iter()
                .map(|t| vec![t.len() as f32, 1.0])
                .collect(),
            model: request.model,
            usage: None,
        })
    }
}

/// Sleeps on every call and records the peak number of concurrent calls.
#[derive(Default)]
pub struct SlowProvider {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowProvider {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for SlowProvider {
    fn name(&self) -> &str {
        "slow"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(ProviderResponse {
            message: Message::assistant("done"),
            usage: None,
            model: request.model,
        })
    }
}
