//! Call limiter: caps in-flight calls and enforces an optional call budget.
//!
//! Every call waits for a semaphore permit before reaching the wrapped
//! provider. Chat completions additionally count against the budget; once
//! it is spent every further completion fails with `BudgetExhausted`.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use timegraph_core::error::ProviderError;
use timegraph_core::provider::*;
use tokio::sync::Semaphore;
use tracing::{trace, warn};

pub struct LimitedProvider {
    name: String,
    inner: Arc<dyn Provider>,
    permits: Arc<Semaphore>,
    budget: Option<u64>,
    used: AtomicU64,
}

impl LimitedProvider {
    /// Wrap `inner` allowing at most `max_async` concurrent calls.
    pub fn new(inner: Arc<dyn Provider>, max_async: usize) -> Self {
        Self {
            name: format!("limited:{}", inner.name()),
            inner,
            permits: Arc::new(Semaphore::new(max_async.max(1))),
            budget: None,
            used: AtomicU64::new(0),
        }
    }

    /// Fail completions after `budget` calls.
    pub fn with_budget(mut self, budget: Option<u64>) -> Self {
        self.budget = budget;
        self
    }

    /// Completions issued so far, including rejected ones.
    pub fn calls_made(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    fn charge(&self) -> Result<(), ProviderError> {
        let n = self.used.fetch_add(1, Ordering::SeqCst);
        match self.budget {
            Some(limit) if n >= limit => {
                warn!(limit, "Call budget exhausted");
                Err(ProviderError::BudgetExhausted { limit })
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Provider for LimitedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.charge()?;
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ProviderError::NotConfigured(format!("Call limiter closed: {e}")))?;
        trace!(available = self.permits.available_permits(), "Completion permit acquired");
        self.inner.complete(request).await
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ProviderError::NotConfigured(format!("Call limiter closed: {e}")))?;
        self.inner.embed(request).await
    }
}
