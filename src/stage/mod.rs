// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Stage runners
//!
//! A stage runner executes one external collaborator to completion and maps
//! its exit status into a structured outcome. Non-zero exits come back as
//! values, not errors; only launch failures and timeouts are errors, since
//! those mean the collaborator never ran (or never finished).

mod process;

pub use process::ProcessRunner;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::TeleflowResult;

/// One external collaborator invocation
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Entries layered over the inherited process environment
    pub env: HashMap<String, String>,
}

impl CommandSpec {
    /// Single-line rendering for logs and failure reasons
    pub fn display_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Outcome of a completed stage process
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub exit_code: i32,

    /// Combined stdout/stderr, bounded by the runner's capture cap
    pub output: String,

    pub duration: Duration,
}

impl StageOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last portion of the captured output, for failure reasons
    pub fn output_tail(&self, max_chars: usize) -> String {
        let trimmed = self.output.trim_end();
        match trimmed.char_indices().rev().nth(max_chars.saturating_sub(1)) {
            Some((idx, _)) => trimmed[idx..].to_string(),
            None => trimmed.to_string(),
        }
    }
}

/// Capability to run one external collaborator to completion.
///
/// Any collaborator satisfying `run(spec) -> outcome` is substitutable:
/// a script, a binary, or a scripted stand-in under test.
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Run the command to completion, enforcing `timeout`.
    ///
    /// Returns `Ok` with a non-zero exit code when the process ran and
    /// failed; the caller decides whether that is fatal. `Err` is reserved
    /// for `LaunchFailure` and `StageTimeout`.
    async fn run(
        &self,
        stage: &str,
        spec: &CommandSpec,
        timeout: Duration,
    ) -> TeleflowResult<StageOutcome>;

    /// Pre-flight check that the program can be found at all
    fn check_available(&self, program: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_line() {
        let spec = CommandSpec {
            program: "dbt".into(),
            args: vec!["run".into(), "--project-dir".into(), "wh".into()],
            working_dir: PathBuf::from("."),
            env: HashMap::new(),
        };
        assert_eq!(spec.display_line(), "dbt run --project-dir wh");
    }

    #[test]
    fn test_output_tail_keeps_end() {
        let outcome = StageOutcome {
            exit_code: 1,
            output: "aaaa bbbb cccc\n".into(),
            duration: Duration::from_secs(1),
        };
        assert_eq!(outcome.output_tail(4), "cccc");
        assert_eq!(outcome.output_tail(1000), "aaaa bbbb cccc");
    }
}
