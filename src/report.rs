// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Failure reporting
//!
//! The executor emits exactly one structured event per failed run: the
//! first failing stage and its reason (downstream stages are skipped, so
//! there is never a second). Successful runs emit nothing. The trait seam
//! lets an alert sink replace the log-backed reporter without touching the
//! run state machine.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::pipeline::StageName;

/// Terminal failure of one run
#[derive(Debug, Clone)]
pub struct FailureEvent {
    pub run_id: Uuid,
    pub failed_stage: StageName,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    /// True when the failure points at the environment (e.g. a missing
    /// collaborator binary) rather than the data
    pub environment_defect: bool,
}

/// Observer of terminal run failures
pub trait FailureReporter: Send + Sync {
    fn report(&self, event: &FailureEvent);
}

/// Reporter that emits one structured log event
pub struct LogReporter;

impl FailureReporter for LogReporter {
    fn report(&self, event: &FailureEvent) {
        tracing::error!(
            run_id = %event.run_id,
            failed_stage = %event.failed_stage,
            reason = %event.reason,
            timestamp = %event.timestamp,
            environment_defect = event.environment_defect,
            "pipeline run failed"
        );
    }
}
