//! timegraph CLI: the main entry point.
//!
//! Commands:
//! - `init`: Write a default `timegraph.toml`
//! - `insert`: Index documents under a period tag
//! - `query`: Ask a question scoped to some periods, inferred periods, or globally
//! - `ask`: Ask a question spanning several times
//! - `communities`: Recluster the graph and regenerate community reports
//! - `status`: Show the dataset and its configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "timegraph",
    about = "timegraph: temporal knowledge graph RAG",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./timegraph.toml)
    #[arg(short, long, global = true, env = "TIMEGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Index documents observed in one period
    Insert {
        /// Period tag of the documents, e.g. 2022
        #[arg(short, long)]
        period: String,

        /// Text files to index, one document each
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Answer a question from the graph
    Query {
        question: String,

        /// Periods to search: `2022`, `2021,2022` or `2010-2015`.
        /// Inferred from the question when omitted
        #[arg(short, long)]
        time: Option<String>,

        /// Answer from community reports over the whole graph
        #[arg(short, long, conflicts_with = "time")]
        global: bool,

        /// Print the retrieved context instead of an answer
        #[arg(long)]
        context_only: bool,
    },

    /// Answer a question that compares several times
    Ask { question: String },

    /// Recluster the graph and regenerate community reports
    Communities,

    /// Show the dataset and its configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Init { force } => commands::init::run(config, force)?,
        Commands::Insert { period, files } => commands::insert::run(config, &period, &files).await?,
        Commands::Query {
            question,
            time,
            global,
            context_only,
        } => commands::query::run(config, &question, time.as_deref(), global, context_only).await?,
        Commands::Ask { question } => commands::ask::run(config, &question).await?,
        Commands::Communities => commands::communities::run(config).await?,
        Commands::Status => commands::status::run(config).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_needs_period_and_files() {
        let cli = Cli::try_parse_from(["timegraph", "insert", "--period", "2022", "a.txt", "b.txt"])
            .unwrap();
        match cli.command {
            Commands::Insert { period, files } => {
                assert_eq!(period, "2022");
                assert_eq!(files.len(), 2);
            }
            _ => panic!("expected insert"),
        }
        assert!(Cli::try_parse_from(["timegraph", "insert", "a.txt"]).is_err());
        assert!(Cli::try_parse_from(["timegraph", "insert", "--period", "2022"]).is_err());
    }

    #[test]
    fn query_time_is_optional_but_exclusive_with_global() {
        assert!(Cli::try_parse_from(["timegraph", "query", "who?"]).is_ok());
        assert!(Cli::try_parse_from(["timegraph", "query", "who?", "--time", "2022"]).is_ok());
        assert!(Cli::try_parse_from(["timegraph", "query", "who?", "--global"]).is_ok());
        assert!(
            Cli::try_parse_from(["timegraph", "query", "who?", "--global", "--time", "2022"])
                .is_err()
        );
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "timegraph",
            "query",
            "who?",
            "-t",
            "2021,2022",
            "--context-only",
            "--config",
            "data/timegraph.toml",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("data/timegraph.toml")));
        match cli.command {
            Commands::Query {
                time, context_only, ..
            } => {
                assert_eq!(time.as_deref(), Some("2021,2022"));
                assert!(context_only);
            }
            _ => panic!("expected query"),
        }
    }
}
