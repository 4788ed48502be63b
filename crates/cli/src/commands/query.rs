//! `timegraph query`: Period-scoped or global question answering. Without
//! `--time` the periods are read from the question itself.

use std::path::Path;

use super::CommandResult;

pub async fn run(
    config: Option<&Path>,
    question: &str,
    time: Option<&str>,
    global: bool,
    context_only: bool,
) -> CommandResult {
    let tg = super::open(config)?;
    let mut param = tg.query_param();
    if context_only {
        param = param.context_only();
    }

    let answer = match (global, time) {
        (true, _) => tg.query_global(question, &param).await?,
        (false, Some(time)) => {
            let selector = tg.parse_selector(time)?;
            tg.query(question, &selector, &param).await?
        }
        (false, None) => tg.query_auto(question, &param).await?,
    };
    println!("{answer}");
    Ok(())
}
