// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! CLI integration tests for the subcommands that need no warehouse

use assert_cmd::Command;
use predicates::prelude::*;

fn teleflow() -> Command {
    Command::cargo_bin("teleflow").expect("binary builds")
}

#[test]
fn graph_text_lists_the_chain_in_order() {
    teleflow()
        .arg("graph")
        .assert()
        .success()
        .stdout(predicate::str::contains("1. scrape"))
        .stdout(predicate::str::contains("6. selective_refresh"))
        .stdout(predicate::str::contains("[after: detect]"));
}

#[test]
fn graph_mermaid_renders_edges() {
    teleflow()
        .args(["graph", "--format", "mermaid"])
        .assert()
        .success()
        .stdout(predicate::str::contains("graph TD"))
        .stdout(predicate::str::contains("scrape --> load_raw"));
}

#[test]
fn graph_dot_renders_edges() {
    teleflow()
        .args(["graph", "--format", "dot"])
        .assert()
        .success()
        .stdout(predicate::str::contains("digraph pipeline"))
        .stdout(predicate::str::contains("\"transform\" -> \"detect\""));
}

#[test]
fn init_writes_a_valid_config_and_validate_accepts_it() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;

    teleflow()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
    assert!(dir.path().join("teleflow.yaml").exists());

    teleflow()
        .current_dir(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));

    Ok(())
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let dir = tempfile::tempdir().unwrap();

    teleflow()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();

    teleflow()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    teleflow()
        .current_dir(dir.path())
        .args(["init", "--force"])
        .assert()
        .success();
}

#[test]
fn validate_fails_without_a_config_file() {
    let dir = tempfile::tempdir().unwrap();

    teleflow()
        .current_dir(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn validate_rejects_a_broken_config() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(
        dir.path().join("teleflow.yaml"),
        "channels: []\ndatabase:\n  host: localhost\n  dbname: x\n  user: y\n",
    )?;

    teleflow()
        .current_dir(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stdout(predicate::str::contains("channels"));

    Ok(())
}
