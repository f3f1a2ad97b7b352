// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! teleflow - Telegram analytics pipeline orchestrator
//!
//! Sequences scrape, load, transform, and enrichment into one daily run.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use teleflow::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Secrets (e.g. the warehouse password) may live in .env
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "teleflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Init { force } => teleflow::cli::init::run(force, cli.verbose).await,
        Commands::Run { config } => teleflow::cli::run::run(config, cli.verbose).await,
        Commands::Schedule { config } => teleflow::cli::schedule::run(config, cli.verbose).await,
        Commands::Validate { config } => teleflow::cli::validate::run(config, cli.verbose).await,
        Commands::Graph { format } => teleflow::cli::graph::run(format, cli.verbose).await,
    }
}
