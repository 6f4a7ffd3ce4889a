mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use folio::config::FolioConfig;

#[derive(Parser)]
#[command(name = "folio", version, about = "Personal knowledge-library engine")]
struct Cli {
    /// Alternate config file (default: ~/.folio/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a resource and print its externalized form
    Query(cli::query::QueryArgs),
    /// Show library statistics
    Stats,
    /// Show recent changes from the commit journal
    Changes {
        /// Expand a single commit id instead of listing
        #[arg(long)]
        commit: Option<String>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Record a sign-in for the account with the given email
    SignIn {
        email: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => FolioConfig::load_from(path)?,
        None => FolioConfig::load()?,
    };

    // Log to stderr so stdout stays clean for piped JSON output.
    let filter =
        EnvFilter::try_new(&config.server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Query(args) => cli::query::query(&config, &args).await,
        Command::Stats => cli::stats::stats(&config).await,
        Command::Changes {
            commit,
            offset,
            limit,
        } => cli::changes::changes(&config, commit.as_deref(), offset, limit).await,
        Command::SignIn { email } => cli::sign_in::sign_in(&config, &email).await,
    }
}
