// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Schedule command - run the daily scheduler daemon

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

use super::run::{build_executor, load_validated_config};
use crate::scheduler::Scheduler;

/// Run the schedule command
pub async fn run(config_path: PathBuf, verbose: bool) -> Result<()> {
    let config = load_validated_config(&config_path, verbose)?;
    let schedule = config.schedule.clone();

    let executor = Arc::new(build_executor(config).await?);

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

    println!("{}", "Starting scheduler...".bold());
    println!(
        "Daily cadence: {} (UTC{:+})",
        schedule.time.bold(),
        schedule.utc_offset_hours
    );
    println!("Press {} to stop (cancels an active run).", "Ctrl+C".cyan());
    println!();

    let scheduler = Scheduler::new(executor, schedule);

    // Ctrl+C flips the shutdown signal; an active run sees the same signal
    // and cancels its current stage
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    scheduler.run_forever(shutdown_rx).await?;

    println!("{}", "Scheduler stopped".dimmed());
    Ok(())
}
