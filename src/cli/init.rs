// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Init command - write a starter configuration

use colored::Colorize;
use miette::Result;
use std::path::Path;

const CONFIG_FILE: &str = "teleflow.yaml";

/// Run the init command
pub async fn run(force: bool, _verbose: bool) -> Result<()> {
    println!("{}", "Initializing teleflow configuration...".bold());
    println!();

    if Path::new(CONFIG_FILE).exists() && !force {
        return Err(miette::miette!(
            "{CONFIG_FILE} already exists. Use --force to overwrite."
        ));
    }

    std::fs::write(CONFIG_FILE, starter_config())
        .map_err(|e| miette::miette!("Failed to write {CONFIG_FILE}: {e}"))?;

    println!("  {} Created {}", "✓".green(), CONFIG_FILE.bold());
    println!();
    println!("Next steps:");
    println!("  1. Edit {} for your warehouse and channels", CONFIG_FILE.cyan());
    println!(
        "  2. Export the database password ({} by default)",
        "TELEFLOW_DB_PASSWORD".cyan()
    );
    println!("  3. Check everything with {}", "teleflow validate".cyan());
    println!("  4. Trigger a run with {}", "teleflow run".cyan());

    Ok(())
}

fn starter_config() -> &'static str {
    r#"# teleflow pipeline configuration

# Warehouse schema the loaders write into
schema: raw

# Root directory the collaborators write artifacts under
data_root: data/raw

# Channels the scraper ingests
channels:
  - chemed
  - lobelia4cosmetics
  - tikvahpharma

database:
  host: localhost
  port: 5432
  dbname: telegram_warehouse
  user: postgres
  # Password is read from this environment variable, never from this file
  password_env: TELEFLOW_DB_PASSWORD
  max_connections: 8
  acquire_timeout_secs: 10

stages:
  # Default per-stage timeout; collaborators may override below
  timeout_secs: 3600
  capture_limit_bytes: 65536
  scrape:
    program: python3
    args: ["src/scraper.py"]
  detect:
    program: python3
    args: ["src/yolo_detect.py"]
  dbt:
    program: dbt
    project_dir: medical_warehouse
    refresh_select: fct_image_detections

loader:
  # Fraction of malformed records an artifact tolerates before it fails
  malformed_threshold: 0.2

classifier:
  person_class: person
  product_classes: [bottle, cup, vase]

schedule:
  # Daily, at this time in the given UTC offset
  time: "02:00"
  utc_offset_hours: 0
"#
}
