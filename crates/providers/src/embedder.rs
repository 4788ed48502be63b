//! Adapts a chat `Provider` that supports embeddings into an `Embedder`.

use async_trait::async_trait;
use std::sync::Arc;
use timegraph_core::error::ProviderError;
use timegraph_core::provider::{EmbeddingRequest, Provider};
use timegraph_core::Embedder;
use tracing::debug;

pub struct ProviderEmbedder {
    provider: Arc<dyn Provider>,
    model: String,
    dim: usize,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, dim: usize) -> Self {
        Self {
            provider,
            model: model.into(),
            dim,
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .provider
            .embed(EmbeddingRequest {
                model: self.model.clone(),
                inputs: texts.to_vec(),
            })
            .await?;

        if response.embeddings.len() != texts.len() {
            return Err(ProviderError::ApiError {
                status_code: 200,
                message: format!(
                    "Expected {} embeddings, got {}",
                    texts.len(),
                    response.embeddings.len()
                ),
            });
        }
        debug!(model = %self.model, count = texts.len(), "Embedded texts");
        Ok(response.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CountingProvider;

    #[tokio::test]
    async fn one_vector_per_text() {
        let embedder = ProviderEmbedder::new(Arc::new(CountingProvider::new("")), "e", 2);
        let vectors = embedder
            .embed(&["a".to_string(), "abc".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 1.0], vec![3.0, 1.0]]);
        assert_eq!(embedder.dim(), 2);
    }

    #[tokio::test]
    async fn empty_input_skips_the_call() {
        let inner = Arc::new(CountingProvider::new(""));
        let embedder = ProviderEmbedder::new(inner.clone(), "e", 2);
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
        assert_eq!(inner.calls(), 0);
    }
}
