//! `timegraph status`: Show the dataset and its configuration.

use std::path::Path;
use timegraph_core::KvStore;

use super::CommandResult;

pub async fn run(config: Option<&Path>) -> CommandResult {
    let tg = super::open(config)?;
    let config = tg.config();

    println!("🕰️  timegraph Status");
    println!("===================");
    println!("  Working dir:  {}", config.working_dir.display());
    println!("  Endpoint:     {}", config.llm.base_url);
    println!("  Chat model:   {}", config.llm.model);
    println!("  Embeddings:   {} (dim {})", config.embedding.model, config.embedding.dim);
    println!("  Cache:        {}", if config.llm.enable_cache { "enabled" } else { "disabled" });
    match config.llm.call_budget {
        Some(budget) => println!("  Call budget:  {budget}"),
        None => println!("  Call budget:  unlimited"),
    }
    println!();
    println!("  Nodes:        {}", tg.graph().node_count().await);
    println!("  Edges:        {}", tg.graph().edge_count().await);
    println!("  Chunks:       {}", tg.text_chunks().all_keys().await?.len());
    println!("  Reports:      {}", tg.community_reports().all_keys().await?.len());

    if !config.has_api_key() {
        println!("\n  ⚠️  No API key, set TIMEGRAPH_API_KEY or OPENAI_API_KEY");
    }
    Ok(())
}
