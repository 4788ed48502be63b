//! `timegraph communities`: Recluster and regenerate community reports.

use std::path::Path;

use super::CommandResult;

pub async fn run(config: Option<&Path>) -> CommandResult {
    let tg = super::open(config)?;
    let count = tg.generate_community_reports().await?;
    if count == 0 {
        println!("⚠️  The graph has no communities yet; insert documents first.");
    } else {
        println!("✅ Generated {count} community reports");
    }
    Ok(())
}
