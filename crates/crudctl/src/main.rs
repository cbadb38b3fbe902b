//! crudctl: Command-line interface for crudstream.
//!
//! Runs streamed queries and updates against a SQLite database from the
//! terminal. Rows are printed as they arrive; Ctrl+C cancels a running query.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use crudstream::observability::{metrics::init_metrics, tracing::init_tracing};
use crudstream::StoreConfig;

/// Command-line interface for crudstream.
#[derive(Parser)]
#[command(name = "crudctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    store: StoreConfig,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query and print its rows
    Query {
        /// Statement text
        sql: String,
        /// Positional parameters, bound in order
        params: Vec<String>,
        /// Named parameters as name=value (excludes positional ones)
        #[arg(short, long = "named")]
        named: Vec<String>,
        /// Stop after this many rows (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        limit: u64,
    },
    /// Execute an update and print the rows affected
    Update {
        /// Statement text
        sql: String,
        /// Positional parameters, bound in order
        params: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing("crudctl", &cli.store.log_level);
    init_metrics();

    match cli.command {
        Commands::Query {
            sql,
            params,
            named,
            limit,
        } => {
            commands::query::run(cli.store, &sql, &params, &named, limit, cli.output).await?;
        }
        Commands::Update { sql, params } => {
            commands::update::run(cli.store, &sql, &params, cli.output).await?;
        }
    }

    Ok(())
}
