//! `timegraph ask`: Multi-time question answering.

use std::path::Path;

use super::CommandResult;

pub async fn run(config: Option<&Path>, question: &str) -> CommandResult {
    let tg = super::open(config)?;
    let answer = tg.answer_temporal(question, &tg.query_param()).await?;
    println!("{answer}");
    Ok(())
}
