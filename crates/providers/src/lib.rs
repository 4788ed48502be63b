//! Model-call plumbing for timegraph.
//!
//! `openai_compat` talks to the backend; `limit`, `cache` and `embedder`
//! wrap any `timegraph_core::Provider`; `harness` stacks them according to
//! configuration and hands the engine an `LlmClient` plus an `Embedder`.

pub mod cache;
pub mod embedder;
pub mod harness;
pub mod limit;
pub mod llm;
pub mod openai_compat;
#[cfg(test)]
mod test_support;

pub use cache::{CachedProvider, CachedResponse, cache_key};
pub use embedder::ProviderEmbedder;
pub use harness::{Harness, build_from_config, wrap};
pub use limit::LimitedProvider;
pub use llm::{CallParams, LlmClient};
pub use openai_compat::OpenAiCompatProvider;
