// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for teleflow.

pub mod graph;
pub mod init;
pub mod run;
pub mod schedule;
pub mod validate;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Telegram analytics pipeline orchestrator
///
/// Sequences scrape, load, transform, and enrichment into one daily run.
#[derive(Parser, Debug)]
#[clap(
    name = "teleflow",
    version,
    about = "Daily pipeline orchestrator: scrape, load, transform, enrich",
    long_about = None,
    after_help = "Examples:\n\
        teleflow init                   Write a starter teleflow.yaml\n\
        teleflow validate               Check the configuration\n\
        teleflow run                    Trigger one pipeline run now\n\
        teleflow schedule               Run the daily scheduler daemon\n\n\
        See 'teleflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter teleflow.yaml
    Init {
        /// Overwrite an existing configuration file
        #[clap(long)]
        force: bool,
    },

    /// Trigger one pipeline run now and wait for it
    Run {
        /// Configuration file
        #[clap(short, long, default_value = "teleflow.yaml")]
        config: PathBuf,
    },

    /// Run the scheduler daemon (daily cadence plus Ctrl+C cancellation)
    Schedule {
        /// Configuration file
        #[clap(short, long, default_value = "teleflow.yaml")]
        config: PathBuf,
    },

    /// Validate the configuration and collaborator availability
    Validate {
        /// Configuration file
        #[clap(default_value = "teleflow.yaml")]
        config: PathBuf,
    },

    /// Show the pipeline stage graph
    Graph {
        /// Output format (text, dot, mermaid)
        #[clap(short, long, default_value = "text")]
        format: GraphFormat,
    },
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

impl std::str::FromStr for GraphFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "dot" => Ok(Self::Dot),
            "mermaid" => Ok(Self::Mermaid),
            _ => Err(format!("Unknown graph format: {}", s)),
        }
    }
}
