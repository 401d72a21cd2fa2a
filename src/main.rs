//! Whale Scope - analyze what a token's largest holders also hold
//!
//! Pulls the portfolio of every top holder and reports what they hold in
//! common and how concentrated each one is in the analyzed token.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

// Use the library crate
use whale_scope::analysis::aggregator::TokenSortKey;
use whale_scope::analysis::ranking::RankBucket;
use whale_scope::cli::commands::{self, AnalyzeOptions, View};
use whale_scope::config::Config;

/// Whale Scope - whale portfolio analysis
#[derive(Parser)]
#[command(name = "whale-scope")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze the top holders of a token
    Analyze {
        /// Token mint address
        token: String,

        /// What to print
        #[arg(long, value_enum, default_value = "summary")]
        view: View,

        /// Token table order: value or holders
        #[arg(long, default_value = "value")]
        sort: TokenSortKey,

        /// Cluster page (1-based)
        #[arg(long, default_value = "1")]
        page: usize,

        /// Clusters per page
        #[arg(long, default_value = "5")]
        page_size: usize,

        /// Ranking bucket: 1..10, ">10" or "conspiracy"
        #[arg(long)]
        bucket: Option<RankBucket>,
    },

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::from_default_env().add_directive("whale_scope=info".parse()?);
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Analyze {
            token,
            view,
            sort,
            page,
            page_size,
            bucket,
        } => {
            let options = AnalyzeOptions {
                view,
                sort,
                page,
                page_size,
                bucket,
            };
            commands::analyze(config, &token, options).await
        }
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
