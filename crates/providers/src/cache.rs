//! Response cache: serves repeated identical calls from a KV store.
//!
//! Two calls are identical when they name the same model and carry the same
//! message sequence. The cache key is the hex SHA-256 of that pair.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use timegraph_core::error::ProviderError;
use timegraph_core::message::Message;
use timegraph_core::provider::*;
use timegraph_core::KvStore;
use tracing::{debug, warn};

/// A cached model reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub model: String,
    pub content: String,
}

/// Cache key for a (model, messages) pair.
pub fn cache_key(model: &str, messages: &[Message]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    for message in messages {
        hasher.update([0u8]);
        hasher.update(message.role.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(message.content.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// A provider that answers from the cache before calling the wrapped provider.
///
/// The cache store is exempt from the rule that store failures are fatal:
/// a failed lookup or write is logged and the call goes through uncached,
/// since losing an entry only costs a repeated model call.
pub struct CachedProvider {
    name: String,
    inner: Arc<dyn Provider>,
    cache: Arc<dyn KvStore<CachedResponse>>,
    hits: AtomicU64,
}

impl CachedProvider {
    pub fn new(inner: Arc<dyn Provider>, cache: Arc<dyn KvStore<CachedResponse>>) -> Self {
        Self {
            name: format!("cached:{}", inner.name()),
            inner,
            cache,
            hits: AtomicU64::new(0),
        }
    }

    /// Number of calls answered from the cache so far.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Provider for CachedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let key = cache_key(&request.model, &request.messages);

        match self.cache.get_by_id(&key).await {
            Ok(Some(cached)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Response cache hit");
                return Ok(ProviderResponse {
                    message: Message::assistant(cached.content),
                    usage: None,
                    model: cached.model,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Response cache lookup failed"),
        }

        let response = self.inner.complete(request).await?;

        let entry = CachedResponse {
            model: response.model.clone(),
            content: response.message.content.clone(),
        };
        if let Err(e) = self.cache.upsert(BTreeMap::from([(key, entry)])).await {
            warn!(error = %e, "Failed to store response in cache");
        }

        Ok(response)
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        self.inner.embed(request).await
    }
}
