//! `timegraph insert`: Index documents under a period tag.

use std::path::{Path, PathBuf};
use timegraph_core::Period;
use timegraph_engine::InsertOutcome;

use super::CommandResult;

pub async fn run(config: Option<&Path>, period: &str, files: &[PathBuf]) -> CommandResult {
    let period = period.trim();
    if period.is_empty() {
        return Err("Period must not be empty".into());
    }
    let period = Period::from(period);

    let mut documents = Vec::with_capacity(files.len());
    for file in files {
        let content = std::fs::read_to_string(file)
            .map_err(|e| format!("Failed to read {}: {e}", file.display()))?;
        if content.trim().is_empty() {
            tracing::warn!(file = %file.display(), "Skipping empty document");
            continue;
        }
        documents.push(content);
    }
    if documents.is_empty() {
        return Err("No non-empty documents to insert".into());
    }

    let tg = super::open(config)?;
    match tg.insert(&documents, &period).await? {
        InsertOutcome::Inserted {
            documents,
            chunks,
            entities,
            relations,
        } => {
            println!("✅ Indexed period {period}");
            println!("  Documents:  {documents}");
            println!("  Chunks:     {chunks}");
            println!("  Entities:   {entities}");
            println!("  Relations:  {relations}");
        }
        InsertOutcome::AlreadyIndexed => {
            println!("  All documents are already indexed.");
        }
        InsertOutcome::NoEntities => {
            println!("⚠️  No entities were extracted; nothing was stored.");
        }
    }
    Ok(())
}
