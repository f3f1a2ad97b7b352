// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Error types for the orchestration engine
//!
//! Stage failures are ordinary values (`StageOutcome`) until the run state
//! machine decides they are fatal; the variants here cover everything that
//! propagates out of a component as an error.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Result type for teleflow operations
pub type TeleflowResult<T> = Result<T, TeleflowError>;

/// Main error type for teleflow
#[derive(Error, Debug, Diagnostic)]
pub enum TeleflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Stage Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stage '{stage}' could not launch '{command}': {error}")]
    #[diagnostic(
        code(teleflow::launch_failure),
        help("The collaborator binary is missing or not executable. This is almost always an environment or configuration defect, not a data defect.")
    )]
    LaunchFailure {
        stage: String,
        command: String,
        error: String,
    },

    #[error("Stage '{stage}' exited with code {exit_code}")]
    #[diagnostic(code(teleflow::stage_exit_failure))]
    StageExitFailure {
        stage: String,
        exit_code: i32,
        #[help]
        output_tail: Option<String>,
    },

    #[error("Stage '{stage}' exceeded its timeout of {timeout_secs}s")]
    #[diagnostic(
        code(teleflow::stage_timeout),
        help("The external process was terminated. Raise `stages.timeout_secs` if the stage legitimately needs longer.")
    )]
    StageTimeout { stage: String, timeout_secs: u64 },

    #[error("Stage '{stage}' was cancelled")]
    #[diagnostic(code(teleflow::stage_cancelled))]
    StageCancelled { stage: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Loader Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error(
        "Artifact '{artifact}' failed validation: {malformed} of {total} records malformed (threshold {threshold})"
    )]
    #[diagnostic(
        code(teleflow::load_validation_failure),
        help("No rows from this artifact were committed. Inspect the producer output and re-trigger the run once fixed.")
    )]
    LoadValidationFailure {
        artifact: String,
        malformed: usize,
        total: usize,
        threshold: f64,
    },

    #[error("Failed to write artifact '{artifact}' to the warehouse: {error}")]
    #[diagnostic(code(teleflow::load_write_failure))]
    LoadWriteFailure { artifact: String, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Scheduler Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("A pipeline run is already in progress (run id {run_id})")]
    #[diagnostic(
        code(teleflow::already_running),
        help("Only one run may execute at a time; wait for the active run to finish, then re-trigger.")
    )]
    AlreadyRunning { run_id: Uuid },

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline Graph Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Circular dependency detected")]
    #[diagnostic(
        code(teleflow::circular_dependency),
        help("Review the stage edges to remove the cycle")
    )]
    CircularDependency { stages: Vec<String> },

    #[error("Stage '{stage}' depends on unknown stage '{dependency}'")]
    #[diagnostic(code(teleflow::unknown_dependency))]
    UnknownDependency { stage: String, dependency: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(teleflow::config_not_found),
        help("Create one with 'teleflow init' or write teleflow.yaml manually")
    )]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid configuration: {reason}")]
    #[diagnostic(code(teleflow::invalid_config))]
    InvalidConfig {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Environment variable '{var}' is not set")]
    #[diagnostic(
        code(teleflow::missing_env),
        help("Export the variable or add it to your .env file")
    )]
    MissingEnv { var: String },

    // ─────────────────────────────────────────────────────────────────────────
    // File Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(teleflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(teleflow::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(teleflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(teleflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(teleflow::json_error))]
    Json { message: String },

    #[error("CSV parsing error: {message}")]
    #[diagnostic(code(teleflow::csv_error))]
    Csv { message: String },

    #[error("Glob pattern error: {message}")]
    #[diagnostic(code(teleflow::glob_error))]
    GlobPattern { message: String },

    #[error("Warehouse error: {message}")]
    #[diagnostic(code(teleflow::database_error))]
    Database { message: String },
}

impl From<std::io::Error> for TeleflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for TeleflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for TeleflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<csv::Error> for TeleflowError {
    fn from(e: csv::Error) -> Self {
        Self::Csv { message: e.to_string() }
    }
}

impl From<glob::PatternError> for TeleflowError {
    fn from(e: glob::PatternError) -> Self {
        Self::GlobPattern { message: e.to_string() }
    }
}

impl From<sqlx::Error> for TeleflowError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database { message: e.to_string() }
    }
}

impl TeleflowError {
    /// True for errors that point at the environment rather than the data.
    ///
    /// These are surfaced more loudly by the failure reporter since a
    /// re-trigger will not help until the environment is fixed.
    pub fn is_environment_defect(&self) -> bool {
        matches!(
            self,
            Self::LaunchFailure { .. } | Self::MissingEnv { .. } | Self::ConfigNotFound { .. }
        )
    }

    /// Short reason string recorded on the failed stage.
    pub fn stage_reason(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_failure_is_environment_defect() {
        let err = TeleflowError::LaunchFailure {
            stage: "scrape".into(),
            command: "scraper".into(),
            error: "No such file or directory".into(),
        };
        assert!(err.is_environment_defect());
    }

    #[test]
    fn test_exit_failure_is_not_environment_defect() {
        let err = TeleflowError::StageExitFailure {
            stage: "transform".into(),
            exit_code: 1,
            output_tail: None,
        };
        assert!(!err.is_environment_defect());
    }
}
