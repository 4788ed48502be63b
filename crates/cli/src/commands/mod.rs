//! Subcommand implementations.

pub mod ask;
pub mod communities;
pub mod init;
pub mod insert;
pub mod query;
pub mod status;

use std::path::Path;
use timegraph_config::AppConfig;
use timegraph_engine::TimeGraph;

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

pub(crate) fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load(path).map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Load the config and open the dataset it points at.
pub(crate) fn open(path: Option<&Path>) -> Result<TimeGraph, Box<dyn std::error::Error>> {
    let config = load_config(path)?;
    if !config.has_api_key() {
        tracing::warn!("No API key found; set TIMEGRAPH_API_KEY or OPENAI_API_KEY");
    }
    Ok(TimeGraph::open(config)?)
}
