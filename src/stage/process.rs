// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! OS-process stage runner
//!
//! Spawns one process per call, captures combined output up to a byte cap,
//! and kills the child if the stage timeout elapses.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

use super::{CommandSpec, StageOutcome, StageRunner};
use crate::errors::{TeleflowError, TeleflowResult};

/// Stage runner backed by `tokio::process`
pub struct ProcessRunner {
    /// Cap on captured combined output; the tail is kept
    capture_limit: usize,
}

impl ProcessRunner {
    pub fn new(capture_limit: usize) -> Self {
        Self { capture_limit }
    }

    /// Keep at most `limit` bytes of the end of `text`, on a char boundary.
    fn truncate_to_tail(&self, text: String) -> String {
        if text.len() <= self.capture_limit {
            return text;
        }

        let mut start = text.len() - self.capture_limit;
        while !text.is_char_boundary(start) {
            start += 1;
        }
        format!("[... output truncated ...]\n{}", &text[start..])
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

#[async_trait]
impl StageRunner for ProcessRunner {
    async fn run(
        &self,
        stage: &str,
        spec: &CommandSpec,
        timeout: Duration,
    ) -> TeleflowResult<StageOutcome> {
        let start = Instant::now();

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        cmd.current_dir(&spec.working_dir);
        cmd.envs(&spec.env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Dropping the wait future on timeout must take the child with it
        cmd.kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| TeleflowError::LaunchFailure {
            stage: stage.to_string(),
            command: spec.display_line(),
            error: e.to_string(),
        })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| TeleflowError::LaunchFailure {
                stage: stage.to_string(),
                command: spec.display_line(),
                error: e.to_string(),
            })?,
            Err(_) => {
                return Err(TeleflowError::StageTimeout {
                    stage: stage.to_string(),
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        let duration = start.elapsed();

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        Ok(StageOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            output: self.truncate_to_tail(combined),
            duration,
        })
    }

    fn check_available(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}
