// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Run and stage state machines
//!
//! A `Run` is one end-to-end execution of the stage chain. It is created
//! when triggered, mutated only by the executor advancing through stages,
//! and immutable once terminal. Summaries persist as JSON in the run-state
//! directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::errors::{TeleflowError, TeleflowResult};

/// The fixed stages of the daily pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Scrape,
    LoadRaw,
    Transform,
    Detect,
    LoadDetections,
    SelectiveRefresh,
}

impl StageName {
    pub const ALL: [StageName; 6] = [
        StageName::Scrape,
        StageName::LoadRaw,
        StageName::Transform,
        StageName::Detect,
        StageName::LoadDetections,
        StageName::SelectiveRefresh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scrape => "scrape",
            Self::LoadRaw => "load_raw",
            Self::Transform => "transform",
            Self::Detect => "detect",
            Self::LoadDetections => "load_detections",
            Self::SelectiveRefresh => "selective_refresh",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Scheduled,
    Manual,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Run lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Stage-node lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// One stage's outcome within a run; never mutated after it finalizes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: StageName,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    /// Bounded captured output (the runner enforces the cap)
    pub output: String,
    pub failure_reason: Option<String>,
}

impl StageRecord {
    fn new(stage: StageName) -> Self {
        Self {
            stage,
            status: StageStatus::NotStarted,
            started_at: None,
            finished_at: None,
            exit_code: None,
            output: String::new(),
            failure_reason: None,
        }
    }

    fn start(&mut self) {
        debug_assert_eq!(self.status, StageStatus::NotStarted);
        self.status = StageStatus::Running;
        self.started_at = Some(Utc::now());
    }

    fn succeed(&mut self, exit_code: Option<i32>, output: String) {
        debug_assert_eq!(self.status, StageStatus::Running);
        self.status = StageStatus::Succeeded;
        self.finished_at = Some(Utc::now());
        self.exit_code = exit_code;
        self.output = output;
    }

    fn fail(&mut self, exit_code: Option<i32>, reason: String) {
        debug_assert!(matches!(
            self.status,
            StageStatus::Running | StageStatus::NotStarted
        ));
        self.status = StageStatus::Failed;
        self.started_at.get_or_insert_with(Utc::now);
        self.finished_at = Some(Utc::now());
        self.exit_code = exit_code;
        self.failure_reason = Some(reason);
    }

    fn skip(&mut self) {
        debug_assert_eq!(self.status, StageStatus::NotStarted);
        self.status = StageStatus::Skipped;
    }
}

/// One end-to-end execution of the pipeline chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub trigger: TriggerKind,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageRecord>,
}

impl Run {
    /// Create a pending run with every stage `NotStarted`, in chain order.
    pub fn new(trigger: TriggerKind, order: &[StageName]) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            status: RunStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            stages: order.iter().copied().map(StageRecord::new).collect(),
        }
    }

    pub fn begin(&mut self) {
        debug_assert_eq!(self.status, RunStatus::Pending);
        self.status = RunStatus::Running;
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RunStatus::Succeeded | RunStatus::Failed)
    }

    pub fn stage(&self, name: StageName) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.stage == name)
    }

    fn stage_mut(&mut self, name: StageName) -> &mut StageRecord {
        self.stages
            .iter_mut()
            .find(|s| s.stage == name)
            .expect("stage belongs to this run's chain")
    }

    pub fn start_stage(&mut self, name: StageName) {
        self.stage_mut(name).start();
    }

    pub fn record_success(&mut self, name: StageName, exit_code: Option<i32>, output: String) {
        self.stage_mut(name).succeed(exit_code, output);
    }

    pub fn record_failure(&mut self, name: StageName, exit_code: Option<i32>, reason: String) {
        self.stage_mut(name).fail(exit_code, reason);
    }

    pub fn skip_stage(&mut self, name: StageName) {
        self.stage_mut(name).skip();
    }

    /// Terminal success: only legal when every stage succeeded.
    pub fn finish_succeeded(&mut self) {
        debug_assert!(self
            .stages
            .iter()
            .all(|s| s.status == StageStatus::Succeeded));
        self.status = RunStatus::Succeeded;
        self.finished_at = Some(Utc::now());
    }

    pub fn finish_failed(&mut self) {
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
    }

    /// First failed stage, if any
    pub fn first_failure(&self) -> Option<&StageRecord> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::Failed)
    }
}

/// Persists run summaries as one JSON file per run
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    pub fn new(dir: impl Into<PathBuf>) -> TeleflowResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| TeleflowError::FileWriteError {
            path: dir.clone(),
            error: e.to_string(),
        })?;
        Ok(Self { dir })
    }

    pub fn save(&self, run: &Run) -> TeleflowResult<PathBuf> {
        let path = self.dir.join(format!("{}.json", run.id));
        let json = serde_json::to_string_pretty(run)?;
        std::fs::write(&path, json).map_err(|e| TeleflowError::FileWriteError {
            path: path.clone(),
            error: e.to_string(),
        })?;
        Ok(path)
    }

    pub fn load(&self, id: Uuid) -> TeleflowResult<Run> {
        let path = self.dir.join(format!("{id}.json"));
        let content =
            std::fs::read_to_string(&path).map_err(|e| TeleflowError::FileReadError {
                path: path.clone(),
                error: e.to_string(),
            })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_lifecycle() {
        let mut run = Run::new(TriggerKind::Manual, &StageName::ALL);
        assert_eq!(run.status, RunStatus::Pending);
        assert!(!run.is_terminal());

        run.begin();
        assert_eq!(run.status, RunStatus::Running);

        for stage in StageName::ALL {
            run.start_stage(stage);
            run.record_success(stage, Some(0), String::new());
        }
        run.finish_succeeded();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(run.is_terminal());
        assert!(run.finished_at.is_some());
        assert!(run.first_failure().is_none());
    }

    #[test]
    fn test_failure_records_reason_and_skips() {
        let mut run = Run::new(TriggerKind::Scheduled, &StageName::ALL);
        run.begin();

        run.start_stage(StageName::Scrape);
        run.record_success(StageName::Scrape, Some(0), String::new());

        run.start_stage(StageName::LoadRaw);
        run.record_failure(StageName::LoadRaw, None, "artifact failed validation".into());
        for stage in [
            StageName::Transform,
            StageName::Detect,
            StageName::LoadDetections,
            StageName::SelectiveRefresh,
        ] {
            run.skip_stage(stage);
        }
        run.finish_failed();

        assert_eq!(run.status, RunStatus::Failed);
        let failure = run.first_failure().unwrap();
        assert_eq!(failure.stage, StageName::LoadRaw);
        assert_eq!(
            failure.failure_reason.as_deref(),
            Some("artifact failed validation")
        );
        assert_eq!(
            run.stage(StageName::Detect).unwrap().status,
            StageStatus::Skipped
        );
    }

    #[test]
    fn test_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path().join("runs")).unwrap();

        let mut run = Run::new(TriggerKind::Manual, &StageName::ALL);
        run.begin();
        run.start_stage(StageName::Scrape);
        run.record_success(StageName::Scrape, Some(0), "ok".into());

        let path = store.save(&run).unwrap();
        assert!(path.exists());

        let loaded = store.load(run.id).unwrap();
        assert_eq!(loaded.id, run.id);
        assert_eq!(loaded.stages.len(), run.stages.len());
        assert_eq!(
            loaded.stage(StageName::Scrape).unwrap().status,
            StageStatus::Succeeded
        );
    }

    #[test]
    fn test_stage_name_round_trips_through_serde() {
        let json = serde_json::to_string(&StageName::LoadDetections).unwrap();
        assert_eq!(json, "\"load_detections\"");
        let back: StageName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StageName::LoadDetections);
    }
}
