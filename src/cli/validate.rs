// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Validate command - check configuration and collaborator availability

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use crate::config::TeleflowConfig;
use crate::stage::{ProcessRunner, StageRunner};

/// Run the validate command
pub async fn run(config_path: PathBuf, verbose: bool) -> Result<()> {
    println!("Validating {}...", config_path.display().to_string().bold());
    println!();

    let config = TeleflowConfig::from_file(&config_path)?;
    let validation = config.validate();

    for error in &validation.errors {
        println!("  {} {}", "✗".red(), error);
    }
    for warning in &validation.warnings {
        println!("  {} {}", "⚠".yellow(), warning);
    }

    // Availability is advisory here: the host running `validate` may not be
    // the host running the pipeline
    let runner = ProcessRunner::new(config.stages.capture_limit_bytes);
    for program in [
        &config.stages.scrape.program,
        &config.stages.dbt.program,
        &config.stages.detect.program,
    ] {
        if runner.check_available(program) {
            if verbose {
                println!("  {} collaborator '{}' found", "✓".green(), program);
            }
        } else {
            println!(
                "  {} collaborator '{}' not found on this host",
                "⚠".yellow(),
                program
            );
        }
    }

    println!();
    if validation.is_valid() {
        println!("{}", "Configuration is valid".green());
        Ok(())
    } else {
        Err(miette::miette!(
            "Configuration has {} error(s)",
            validation.errors.len()
        ))
    }
}
