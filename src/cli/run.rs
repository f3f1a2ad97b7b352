// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Run command - trigger one pipeline run now

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::TeleflowConfig;
use crate::pipeline::{Run, RunExecutor, RunStatus, RunStore, StageStatus, TriggerKind};
use crate::report::LogReporter;
use crate::stage::ProcessRunner;
use crate::utils::create_spinner;
use crate::warehouse::PgWarehouse;

/// Run the run command
pub async fn run(config_path: PathBuf, verbose: bool) -> Result<()> {
    let config = load_validated_config(&config_path, verbose)?;

    let executor = Arc::new(build_executor(config.clone()).await?);

    let missing = executor.missing_tools();
    if !missing.is_empty() {
        eprintln!("{}", "Missing collaborator programs:".red().bold());
        for program in &missing {
            eprintln!("  {} {}", "✗".red(), program);
        }
        return Err(miette::miette!(
            "Required collaborator programs are not installed"
        ));
    }

    // Ctrl+C cancels the active stage and skips the rest
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    println!();
    println!("{}: daily telegram analytics", "Pipeline".bold());
    println!("{}", "═".repeat(50));

    let run = executor
        .execute_with_cancel(TriggerKind::Manual, cancel_rx)
        .await;

    print_summary(&run);

    if run.status != RunStatus::Succeeded {
        return Err(miette::miette!("Pipeline run {} failed", run.id));
    }
    Ok(())
}

/// Load the config file and fail on validation errors
pub(crate) fn load_validated_config(
    config_path: &PathBuf,
    verbose: bool,
) -> Result<Arc<TeleflowConfig>> {
    let config = TeleflowConfig::from_file(config_path)?;

    let validation = config.validate();
    if !validation.is_valid() {
        eprintln!("{}", "Configuration validation failed:".red().bold());
        for error in &validation.errors {
            eprintln!("  {} {}", "✗".red(), error);
        }
        return Err(miette::miette!("Configuration is invalid"));
    }

    if validation.has_warnings() && verbose {
        eprintln!("{}", "Configuration warnings:".yellow().bold());
        for warning in &validation.warnings {
            eprintln!("  {} {}", "⚠".yellow(), warning);
        }
        eprintln!();
    }

    Ok(Arc::new(config))
}

/// Wire the production executor: OS processes, Postgres, log reporter
pub(crate) async fn build_executor(config: Arc<TeleflowConfig>) -> Result<RunExecutor> {
    let spinner = create_spinner("Connecting to warehouse...");
    let warehouse = PgWarehouse::connect(&config.database, &config.schema).await?;
    spinner.finish_and_clear();

    let runner = ProcessRunner::new(config.stages.capture_limit_bytes);
    let store = RunStore::new(config.state_dir())?;

    let executor = RunExecutor::new(
        config,
        Arc::new(runner),
        Arc::new(warehouse),
        Arc::new(LogReporter),
    )?
    .with_store(store);

    Ok(executor)
}

fn print_summary(run: &Run) {
    println!();
    println!("{}: {}", "Run".bold(), run.id);
    println!("{}: {}", "Trigger".bold(), run.trigger);

    for record in &run.stages {
        let (mark, status) = match record.status {
            StageStatus::Succeeded => ("✓".green(), "succeeded"),
            StageStatus::Failed => ("✗".red(), "failed"),
            StageStatus::Skipped => ("○".dimmed(), "skipped"),
            StageStatus::Running => ("→".blue(), "running"),
            StageStatus::NotStarted => ("·".dimmed(), "not started"),
        };

        print!("  {} {:<20} {}", mark, record.stage.to_string(), status);
        if let Some(reason) = &record.failure_reason {
            print!("  {}", reason.dimmed());
        }
        println!();
    }

    println!();
    match run.status {
        RunStatus::Succeeded => println!("{}", "Pipeline run succeeded".green()),
        RunStatus::Failed => println!("{}", "Pipeline run failed".red()),
        _ => {}
    }
}
