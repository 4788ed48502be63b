//! Configuration loading, validation, and management for timegraph.
//!
//! Loads configuration from `timegraph.toml` (or an explicit path) with
//! environment variable overrides. Validates all settings at startup.
//! Components receive the section they need through their constructors.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use timegraph_core::WeightHeuristic;

/// File name looked up when no explicit config path is given.
pub const CONFIG_FILE_NAME: &str = "timegraph.toml";

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding every persisted store of a dataset
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// API key for the model endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Chat model and call harness settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding model settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Retrieval budgets and defaults
    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub community: CommunityConfig,

    #[serde(default)]
    pub temporal: TemporalConfig,
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("./timegraph_cache")
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("working_dir", &self.working_dir)
            .field("api_key", &redact(&self.api_key))
            .field("llm", &self.llm)
            .field("embedding", &self.embedding)
            .field("chunking", &self.chunking)
            .field("extraction", &self.extraction)
            .field("query", &self.query)
            .field("community", &self.community)
            .field("temporal", &self.temporal)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default)]
    pub temperature: f32,

    /// Maximum tokens per reply, unset for the backend default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Maximum in-flight chat calls
    #[serde(default = "default_max_async")]
    pub max_async: usize,

    /// Serve identical calls from the response cache
    #[serde(default = "default_true")]
    pub enable_cache: bool,

    /// Total chat calls allowed per process, unset for no limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_budget: Option<u64>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".into()
}
fn default_max_async() -> usize {
    16
}
fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_llm_model(),
            temperature: 0.0,
            max_tokens: None,
            max_async: default_max_async(),
            enable_cache: true,
            call_budget: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_dim")]
    pub dim: usize,

    /// Texts per embedding request
    #[serde(default = "default_batch_num")]
    pub batch_num: usize,

    /// Maximum in-flight embedding calls
    #[serde(default = "default_max_async")]
    pub max_async: usize,

    /// Vector matches below this cosine similarity are discarded
    #[serde(default = "default_better_than_threshold")]
    pub better_than_threshold: f32,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_embedding_dim() -> usize {
    1536
}
fn default_batch_num() -> usize {
    32
}
fn default_better_than_threshold() -> f32 {
    0.2
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dim: default_embedding_dim(),
            batch_num: default_batch_num(),
            max_async: default_max_async(),
            better_than_threshold: default_better_than_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_token_size")]
    pub chunk_token_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub overlap_token_size: usize,
}

fn default_chunk_token_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    100
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_token_size: default_chunk_token_size(),
            overlap_token_size: default_chunk_overlap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Continuation rounds after the first extraction pass
    #[serde(default = "default_max_gleaning")]
    pub max_gleaning: usize,

    /// Summarize each chunk before extracting from it
    #[serde(default = "default_true")]
    pub summarize_chunks: bool,

    #[serde(default = "default_entity_types")]
    pub entity_types: Vec<String>,
}

fn default_max_gleaning() -> usize {
    1
}
fn default_entity_types() -> Vec<String> {
    ["organization", "person", "geo", "event"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_gleaning: default_max_gleaning(),
            summarize_chunks: true,
            entity_types: default_entity_types(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Entities fetched from the vector index per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_max_token_for_text_unit")]
    pub max_token_for_text_unit: usize,

    /// Budget for the relationships table
    #[serde(default = "default_max_token_for_local_context")]
    pub max_token_for_local_context: usize,

    #[serde(default = "default_max_token_for_entities")]
    pub max_token_for_entities: usize,

    /// Description fragments kept across all matched entities
    #[serde(default = "default_top_fragments")]
    pub top_fragments: usize,

    /// Fragments kept per relationship once it has more than this many
    #[serde(default = "default_edge_fragment_limit")]
    pub edge_fragment_limit: usize,

    #[serde(default = "default_response_type")]
    pub response_type: String,

    /// Highest community level consulted by global queries
    #[serde(default = "default_level")]
    pub level: u32,

    #[serde(default = "default_global_max_consider_community")]
    pub global_max_consider_community: usize,

    #[serde(default)]
    pub global_min_community_rating: f64,

    #[serde(default = "default_global_max_token_for_community_report")]
    pub global_max_token_for_community_report: usize,
}

fn default_top_k() -> usize {
    10
}
fn default_max_token_for_text_unit() -> usize {
    5200
}
fn default_max_token_for_local_context() -> usize {
    1000
}
fn default_max_token_for_entities() -> usize {
    600
}
fn default_top_fragments() -> usize {
    15
}
fn default_edge_fragment_limit() -> usize {
    3
}
fn default_response_type() -> String {
    "Multiple Paragraphs".into()
}
fn default_level() -> u32 {
    2
}
fn default_global_max_consider_community() -> usize {
    512
}
fn default_global_max_token_for_community_report() -> usize {
    16384
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_token_for_text_unit: default_max_token_for_text_unit(),
            max_token_for_local_context: default_max_token_for_local_context(),
            max_token_for_entities: default_max_token_for_entities(),
            top_fragments: default_top_fragments(),
            edge_fragment_limit: default_edge_fragment_limit(),
            response_type: default_response_type(),
            level: default_level(),
            global_max_consider_community: default_global_max_consider_community(),
            global_min_community_rating: 0.0,
            global_max_token_for_community_report: default_global_max_token_for_community_report(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityConfig {
    /// Token budget of one packed community description
    #[serde(default = "default_community_max_token_size")]
    pub max_token_size: usize,

    /// Always include sub-community reports when they exist
    #[serde(default)]
    pub force_to_use_sub_communities: bool,

    /// Label propagation rounds before giving up on convergence
    #[serde(default = "default_max_label_rounds")]
    pub max_label_rounds: usize,
}

fn default_community_max_token_size() -> usize {
    32768
}
fn default_max_label_rounds() -> usize {
    20
}

impl Default for CommunityConfig {
    fn default() -> Self {
        Self {
            max_token_size: default_community_max_token_size(),
            force_to_use_sub_communities: false,
            max_label_rounds: default_max_label_rounds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalConfig {
    /// Weight recompute rule for edges in a projection
    #[serde(default)]
    pub weight_heuristic: WeightHeuristic,

    /// Widest year range a time selector may expand, in years
    #[serde(default = "default_max_range_years")]
    pub max_range_years: u32,
}

fn default_max_range_years() -> u32 {
    200
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            weight_heuristic: WeightHeuristic::default(),
            max_range_years: default_max_range_years(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, or `./timegraph.toml` when `None`,
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Environment variable overrides (highest priority).
    pub fn apply_env_overrides(&mut self) {
        if self.api_key.is_none() {
            self.api_key = std::env::var("TIMEGRAPH_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(base_url) = std::env::var("OPENAI_API_BASE") {
            self.llm.base_url = base_url;
        }

        if let Ok(model) = std::env::var("LLM_MODEL") {
            self.llm.model = model;
        }

        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.temperature < 0.0 || self.llm.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.llm.max_async == 0 || self.embedding.max_async == 0 {
            return Err(ConfigError::ValidationError(
                "max_async must be at least 1".into(),
            ));
        }

        if self.embedding.batch_num == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.batch_num must be at least 1".into(),
            ));
        }

        if self.chunking.overlap_token_size >= self.chunking.chunk_token_size {
            return Err(ConfigError::ValidationError(
                "chunking.overlap_token_size must be smaller than chunk_token_size".into(),
            ));
        }

        if self.query.top_k == 0 {
            return Err(ConfigError::ValidationError("query.top_k must be > 0".into()));
        }

        if self.temporal.max_range_years == 0 {
            return Err(ConfigError::ValidationError(
                "temporal.max_range_years must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            api_key: None,
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            extraction: ExtractionConfig::default(),
            query: QueryConfig::default(),
            community: CommunityConfig::default(),
            temporal: TemporalConfig::default(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for timegraph_core::Error {
    fn from(e: ConfigError) -> Self {
        timegraph_core::Error::Config {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.llm.max_async, 16);
        assert_eq!(config.query.top_k, 10);
        assert_eq!(config.query.max_token_for_text_unit, 5200);
        assert_eq!(config.extraction.entity_types.len(), 4);
        assert_eq!(config.temporal.weight_heuristic, WeightHeuristic::MaxPlusCount);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.llm.model, config.llm.model);
        assert_eq!(parsed.community.max_token_size, config.community.max_token_size);
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let config = AppConfig {
            chunking: ChunkingConfig {
                chunk_token_size: 100,
                overlap_token_size: 100,
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.llm.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_range_cap_rejected() {
        let mut config = AppConfig::default();
        config.temporal.max_range_years = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/timegraph.toml")).unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn partial_file_keeps_section_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
working_dir = "/data/reports"

[query]
top_k = 25

[temporal]
weight_heuristic = "sum"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.working_dir, PathBuf::from("/data/reports"));
        assert_eq!(config.query.top_k, 25);
        assert_eq!(config.query.max_token_for_local_context, 1000);
        assert_eq!(config.temporal.weight_heuristic, WeightHeuristic::Sum);
        assert_eq!(config.temporal.max_range_years, 200);
        assert_eq!(config.embedding.batch_num, 32);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[query\ntop_k = ").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-secret"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o-mini"));
        assert!(toml_str.contains("max_plus_count"));
    }
}
