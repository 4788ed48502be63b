//! Call harness assembly: builds the layered chat and embedding clients
//! from configuration.
//!
//! Chat calls go through `Cached(Limited(backend))`, so cache hits consume
//! neither a concurrency permit nor call budget. Embeddings get their own
//! limiter with no budget.

use std::sync::Arc;
use std::time::Duration;
use timegraph_config::AppConfig;
use timegraph_core::provider::Provider;
use timegraph_core::{Embedder, KvStore};
use tracing::{debug, warn};

use crate::cache::{CachedProvider, CachedResponse};
use crate::embedder::ProviderEmbedder;
use crate::limit::LimitedProvider;
use crate::llm::LlmClient;
use crate::openai_compat::OpenAiCompatProvider;

/// The model collaborators the engine calls through.
#[derive(Clone)]
pub struct Harness {
    pub llm: LlmClient,
    pub embedder: Arc<dyn Embedder>,
}

impl Harness {
    pub fn new(llm: LlmClient, embedder: Arc<dyn Embedder>) -> Self {
        Self { llm, embedder }
    }
}

/// Layer limiter, budget and cache around an arbitrary backend.
pub fn wrap(
    backend: Arc<dyn Provider>,
    config: &AppConfig,
    cache: Option<Arc<dyn KvStore<CachedResponse>>>,
) -> Harness {
    let limited: Arc<dyn Provider> = Arc::new(
        LimitedProvider::new(backend.clone(), config.llm.max_async)
            .with_budget(config.llm.call_budget),
    );

    let chat: Arc<dyn Provider> = match cache {
        Some(cache) if config.llm.enable_cache => Arc::new(CachedProvider::new(limited, cache)),
        _ => limited,
    };

    let embedding_limiter: Arc<dyn Provider> =
        Arc::new(LimitedProvider::new(backend, config.embedding.max_async));
    let embedder = Arc::new(ProviderEmbedder::new(
        embedding_limiter,
        config.embedding.model.clone(),
        config.embedding.dim,
    ));

    debug!(
        chat = chat.name(),
        model = %config.llm.model,
        embedding_model = %config.embedding.model,
        "Call harness assembled"
    );

    let llm = LlmClient::new(chat, config.llm.model.clone())
        .with_temperature(config.llm.temperature)
        .with_max_tokens(config.llm.max_tokens);
    Harness::new(llm, embedder)
}

/// Build the harness against the configured OpenAI-compatible endpoint.
pub fn build_from_config(
    config: &AppConfig,
    cache: Option<Arc<dyn KvStore<CachedResponse>>>,
) -> Harness {
    let api_key = config.api_key.clone().unwrap_or_else(|| {
        warn!("No API key configured; requests will likely be rejected");
        String::new()
    });

    let backend = Arc::new(OpenAiCompatProvider::with_timeout(
        "openai",
        config.llm.base_url.clone(),
        api_key,
        Duration::from_secs(config.llm.timeout_secs),
    ));
    wrap(backend, config, cache)
}
