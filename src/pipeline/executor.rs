// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Run executor
//!
//! Drives one run through the stage chain in topological order. Each
//! stage's success gates the next; any failure marks every downstream
//! stage skipped, fails the run, and notifies the failure reporter exactly
//! once. There is no automatic retry inside a run: the operator or the
//! scheduler re-triggers, and the idempotent loaders make that safe.

use chrono::Utc;
use colored::Colorize;
use std::sync::Arc;
use tokio::sync::watch;

use super::{PipelineGraph, Run, RunStore, StageName, TriggerKind};
use crate::classify::ImageClassifier;
use crate::config::TeleflowConfig;
use crate::errors::{TeleflowError, TeleflowResult};
use crate::loader::{DetectionLoader, MessageLoader};
use crate::report::{FailureEvent, FailureReporter};
use crate::stage::{CommandSpec, StageRunner};
use crate::warehouse::WarehouseSink;

/// A stage that finished successfully
struct StageSuccess {
    exit_code: Option<i32>,
    output: String,
}

/// Executes runs over the fixed pipeline graph
pub struct RunExecutor {
    config: Arc<TeleflowConfig>,
    runner: Arc<dyn StageRunner>,
    sink: Arc<dyn WarehouseSink>,
    reporter: Arc<dyn FailureReporter>,
    graph: PipelineGraph,
    order: Vec<StageName>,
    store: Option<RunStore>,
}

impl RunExecutor {
    pub fn new(
        config: Arc<TeleflowConfig>,
        runner: Arc<dyn StageRunner>,
        sink: Arc<dyn WarehouseSink>,
        reporter: Arc<dyn FailureReporter>,
    ) -> TeleflowResult<Self> {
        let graph = PipelineGraph::standard();
        let order = graph.topological_order()?;

        Ok(Self {
            config,
            runner,
            sink,
            reporter,
            graph,
            order,
            store: None,
        })
    }

    /// Persist run summaries to the given store
    pub fn with_store(mut self, store: RunStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn stage_order(&self) -> &[StageName] {
        &self.order
    }

    /// Collaborator programs that cannot be found on this host
    pub fn missing_tools(&self) -> Vec<String> {
        let mut programs = vec![
            self.config.stages.scrape.program.clone(),
            self.config.stages.dbt.program.clone(),
            self.config.stages.detect.program.clone(),
        ];
        let mut seen = std::collections::HashSet::new();
        programs.retain(|p| seen.insert(p.clone()));

        programs
            .into_iter()
            .filter(|p| !self.runner.check_available(p))
            .collect()
    }

    /// Create the pending run for a trigger; the run id is observable
    /// before execution starts.
    pub fn prepare(&self, trigger: TriggerKind) -> Run {
        Run::new(trigger, &self.order)
    }

    /// Execute one run to a terminal state.
    pub async fn execute(&self, trigger: TriggerKind) -> Run {
        let (_tx, rx) = watch::channel(false);
        self.execute_with_cancel(trigger, rx).await
    }

    /// Execute one run, aborting the active stage if `cancel` flips to true.
    pub async fn execute_with_cancel(
        &self,
        trigger: TriggerKind,
        cancel: watch::Receiver<bool>,
    ) -> Run {
        self.execute_prepared(self.prepare(trigger), cancel).await
    }

    /// Drive a prepared run to a terminal state.
    ///
    /// Cancellation terminates the active external process (the runner's
    /// wait future is dropped, killing the child), marks the remaining
    /// stages skipped, and fails the run. Already-committed loader
    /// artifacts are not rolled back.
    pub async fn execute_prepared(&self, mut run: Run, cancel: watch::Receiver<bool>) -> Run {
        run.begin();

        tracing::info!(run_id = %run.id, trigger = %run.trigger, "pipeline run started");

        let mut failure: Option<(StageName, TeleflowError)> = None;

        for &stage in &self.order {
            if *cancel.borrow() {
                failure = Some((
                    stage,
                    TeleflowError::StageCancelled {
                        stage: stage.to_string(),
                    },
                ));
                break;
            }

            print!("  {} {}...", "→".blue(), stage);
            run.start_stage(stage);

            match self.run_stage(stage, cancel.clone()).await {
                Ok(success) => {
                    println!("\r  {} {}", "✓".green(), stage.to_string().bold());
                    run.record_success(stage, success.exit_code, success.output);
                }
                Err(err) => {
                    failure = Some((stage, err));
                    break;
                }
            }
        }

        match failure {
            Some((stage, err)) => {
                let exit_code = match &err {
                    TeleflowError::StageExitFailure { exit_code, .. } => Some(*exit_code),
                    _ => None,
                };
                let reason = err.stage_reason();

                println!("\r  {} {} failed", "✗".red(), stage.to_string().bold());
                run.record_failure(stage, exit_code, reason.clone());

                for skipped in self.graph.downstream_of(stage) {
                    println!(
                        "  {} {} (skipped)",
                        "○".dimmed(),
                        skipped.to_string().dimmed()
                    );
                    run.skip_stage(skipped);
                }
                run.finish_failed();

                self.reporter.report(&FailureEvent {
                    run_id: run.id,
                    failed_stage: stage,
                    reason,
                    timestamp: Utc::now(),
                    environment_defect: err.is_environment_defect(),
                });
            }
            None => {
                run.finish_succeeded();
                tracing::info!(run_id = %run.id, "pipeline run succeeded");
            }
        }

        if let Some(ref store) = self.store {
            if let Err(e) = store.save(&run) {
                tracing::warn!(run_id = %run.id, error = %e, "failed to persist run summary");
            }
        }

        run
    }

    async fn run_stage(
        &self,
        stage: StageName,
        cancel: watch::Receiver<bool>,
    ) -> TeleflowResult<StageSuccess> {
        match stage {
            StageName::Scrape => {
                self.external(stage, self.config.scrape_command(), cancel)
                    .await
            }
            StageName::LoadRaw => {
                self.sink.ensure_schema().await?;
                let loader = MessageLoader::new(
                    self.sink.clone(),
                    self.config.loader.malformed_threshold,
                );
                let report = loader.load(&self.config.messages_root()).await?;
                Ok(StageSuccess {
                    exit_code: None,
                    output: report.summary(),
                })
            }
            StageName::Transform => {
                // dbt run, then dbt test; a test failure fails the node but
                // does not undo run's writes
                let run_out = self
                    .external(stage, self.config.dbt_command("run", None), cancel.clone())
                    .await?;
                let test_out = self
                    .external(stage, self.config.dbt_command("test", None), cancel)
                    .await?;

                let mut output = run_out.output;
                if !output.is_empty() && !test_out.output.is_empty() {
                    output.push('\n');
                }
                output.push_str(&test_out.output);

                Ok(StageSuccess {
                    exit_code: Some(0),
                    output,
                })
            }
            StageName::Detect => {
                self.external(stage, self.config.detect_command(), cancel)
                    .await
            }
            StageName::LoadDetections => {
                self.sink.ensure_schema().await?;
                let classifier = ImageClassifier::new(
                    self.config.classifier.person_class.clone(),
                    &self.config.classifier.product_classes,
                );
                let loader = DetectionLoader::new(
                    self.sink.clone(),
                    classifier,
                    self.config.loader.malformed_threshold,
                );
                let report = loader.load(&self.config.detections_root()).await?;
                Ok(StageSuccess {
                    exit_code: None,
                    output: report.summary(),
                })
            }
            StageName::SelectiveRefresh => {
                let select = self.config.stages.dbt.refresh_select.clone();
                self.external(stage, self.config.dbt_command("run", Some(&select)), cancel)
                    .await
            }
        }
    }

    /// Run one external collaborator, racing it against cancellation.
    async fn external(
        &self,
        stage: StageName,
        spec: CommandSpec,
        cancel: watch::Receiver<bool>,
    ) -> TeleflowResult<StageSuccess> {
        let timeout = self.config.timeout_for(stage);
        tracing::info!(%stage, command = %spec.display_line(), "launching collaborator");

        tokio::select! {
            outcome = self.runner.run(stage.as_str(), &spec, timeout) => {
                let outcome = outcome?;
                if outcome.success() {
                    Ok(StageSuccess {
                        exit_code: Some(0),
                        output: outcome.output,
                    })
                } else {
                    Err(TeleflowError::StageExitFailure {
                        stage: stage.to_string(),
                        exit_code: outcome.exit_code,
                        output_tail: Some(outcome.output_tail(400)),
                    })
                }
            }
            _ = wait_cancelled(cancel) => {
                Err(TeleflowError::StageCancelled {
                    stage: stage.to_string(),
                })
            }
        }
    }
}

/// Resolves when cancellation is requested; pends forever if the trigger
/// side was dropped (cancellation can no longer arrive).
pub(crate) async fn wait_cancelled(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{RunStatus, StageStatus};
    use crate::stage::StageOutcome;
    use crate::warehouse::testing::MemoryWarehouse;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Runner that never spawns processes; outcomes are scripted per stage
    /// (per sub-step for transform).
    struct ScriptedRunner {
        exit_codes: HashMap<String, i32>,
        launch_failures: HashSet<String>,
        invocations: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl ScriptedRunner {
        fn ok() -> Self {
            Self {
                exit_codes: HashMap::new(),
                launch_failures: HashSet::new(),
                invocations: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        fn failing(key: &str, exit_code: i32) -> Self {
            let mut runner = Self::ok();
            runner.exit_codes.insert(key.to_string(), exit_code);
            runner
        }

        fn key(stage: &str, spec: &CommandSpec) -> String {
            if stage == "transform" {
                format!(
                    "{stage}:{}",
                    spec.args.first().map(String::as_str).unwrap_or("")
                )
            } else {
                stage.to_string()
            }
        }

        fn invocations(&self) -> Vec<String> {
            self.invocations.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StageRunner for ScriptedRunner {
        async fn run(
            &self,
            stage: &str,
            spec: &CommandSpec,
            _timeout: Duration,
        ) -> TeleflowResult<StageOutcome> {
            let key = Self::key(stage, spec);
            self.invocations.lock().unwrap().push(key.clone());

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            if self.launch_failures.contains(&key) {
                return Err(TeleflowError::LaunchFailure {
                    stage: stage.to_string(),
                    command: spec.display_line(),
                    error: "No such file or directory".into(),
                });
            }

            let exit_code = self.exit_codes.get(&key).copied().unwrap_or(0);
            Ok(StageOutcome {
                exit_code,
                output: format!("scripted output for {key}"),
                duration: Duration::from_millis(1),
            })
        }

        fn check_available(&self, _program: &str) -> bool {
            true
        }
    }

    /// Reporter that records every event it sees
    #[derive(Default)]
    struct RecordingReporter {
        events: Mutex<Vec<FailureEvent>>,
    }

    impl FailureReporter for RecordingReporter {
        fn report(&self, event: &FailureEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn test_config(data_root: &Path) -> Arc<TeleflowConfig> {
        let yaml = r#"
channels: [chemed]
database:
  host: localhost
  dbname: warehouse
  user: postgres
loader:
  malformed_threshold: 0.5
"#;
        let mut config = TeleflowConfig::from_yaml(yaml).unwrap();
        config.data_root = data_root.to_path_buf();
        Arc::new(config)
    }

    fn executor(
        config: Arc<TeleflowConfig>,
        runner: Arc<ScriptedRunner>,
        sink: Arc<MemoryWarehouse>,
        reporter: Arc<RecordingReporter>,
    ) -> RunExecutor {
        RunExecutor::new(config, runner, sink, reporter).unwrap()
    }

    fn write_scrape_artifact(data_root: &Path) {
        let dir = data_root.join("telegram_messages/2026-08-07");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("chemed.json"),
            r#"[
                {"message_id": 1, "channel_name": "chemed", "message_date": "2026-08-07T08:00:00+00:00",
                 "message_text": "new stock of vitamin C", "views": 900, "forwards": 12,
                 "has_media": true, "image_path": "data/raw/images/chemed/1.jpg"},
                {"message_id": 2, "channel_name": "chemed", "message_date": "2026-08-07T09:00:00+00:00",
                 "message_text": "promo ends friday", "views": 450, "forwards": 4,
                 "has_media": false, "image_path": null},
                {"message_id": 3, "channel_name": "chemed", "message_date": "2026-08-07T10:00:00+00:00",
                 "views": 10, "forwards": 0, "has_media": false, "image_path": null}
            ]"#,
        )
        .unwrap();
    }

    fn write_detection_artifact(data_root: &Path) {
        let dir = data_root.join("yolo_detections/2026-08-07");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("detections.csv"),
            "message_id,channel_name,image_path,detected_class,confidence,image_category\n\
             1,chemed,data/raw/images/chemed/1.jpg,person,0.93,other\n\
             1,chemed,data/raw/images/chemed/1.jpg,bottle,0.81,other\n",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_end_to_end_success_scenario() {
        let dir = tempfile::tempdir().unwrap();
        write_scrape_artifact(dir.path());
        write_detection_artifact(dir.path());

        let runner = Arc::new(ScriptedRunner::ok());
        let sink = Arc::new(MemoryWarehouse::new());
        let reporter = Arc::new(RecordingReporter::default());
        let exec = executor(
            test_config(dir.path()),
            runner.clone(),
            sink.clone(),
            reporter.clone(),
        );

        let run = exec.execute(TriggerKind::Manual).await;

        assert_eq!(run.status, RunStatus::Succeeded);
        for stage in StageName::ALL {
            assert_eq!(run.stage(stage).unwrap().status, StageStatus::Succeeded);
        }

        // 2 well-formed messages committed, the one missing message_text skipped
        assert_eq!(sink.message_count().await, 2);
        let load_raw = run.stage(StageName::LoadRaw).unwrap();
        assert!(load_raw.output.contains("1 record(s) skipped"));

        // person + bottle derives promotional
        let detections = sink
            .detections_for_image("data/raw/images/chemed/1.jpg")
            .await;
        assert_eq!(detections.len(), 2);
        for row in &detections {
            assert_eq!(
                row.image_category,
                crate::classify::ImageCategory::Promotional
            );
        }

        // dbt ran before dbt test, and no failure event was emitted
        let invocations = runner.invocations();
        let run_pos = invocations
            .iter()
            .position(|k| k == "transform:run")
            .unwrap();
        let test_pos = invocations
            .iter()
            .position(|k| k == "transform:test")
            .unwrap();
        assert!(run_pos < test_pos);
        assert!(reporter.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fail_fast_skips_downstream_and_reports_once() {
        let dir = tempfile::tempdir().unwrap();

        let runner = Arc::new(ScriptedRunner::failing("transform:test", 1));
        let sink = Arc::new(MemoryWarehouse::new());
        let reporter = Arc::new(RecordingReporter::default());
        let exec = executor(test_config(dir.path()), runner, sink, reporter.clone());

        let run = exec.execute(TriggerKind::Scheduled).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            run.stage(StageName::Scrape).unwrap().status,
            StageStatus::Succeeded
        );
        assert_eq!(
            run.stage(StageName::LoadRaw).unwrap().status,
            StageStatus::Succeeded
        );

        let transform = run.stage(StageName::Transform).unwrap();
        assert_eq!(transform.status, StageStatus::Failed);
        assert_eq!(transform.exit_code, Some(1));

        for stage in [
            StageName::Detect,
            StageName::LoadDetections,
            StageName::SelectiveRefresh,
        ] {
            assert_eq!(run.stage(stage).unwrap().status, StageStatus::Skipped);
        }

        let events = reporter.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].failed_stage, StageName::Transform);
        assert_eq!(events[0].run_id, run.id);
        assert!(!events[0].environment_defect);
    }

    #[tokio::test]
    async fn test_launch_failure_is_flagged_as_environment_defect() {
        let dir = tempfile::tempdir().unwrap();

        let mut runner = ScriptedRunner::ok();
        runner.launch_failures.insert("scrape".into());
        let reporter = Arc::new(RecordingReporter::default());
        let exec = executor(
            test_config(dir.path()),
            Arc::new(runner),
            Arc::new(MemoryWarehouse::new()),
            reporter.clone(),
        );

        let run = exec.execute(TriggerKind::Manual).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            run.stage(StageName::Scrape).unwrap().status,
            StageStatus::Failed
        );
        for stage in &StageName::ALL[1..] {
            assert_eq!(run.stage(*stage).unwrap().status, StageStatus::Skipped);
        }

        let events = reporter.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].environment_defect);
    }

    #[tokio::test]
    async fn test_load_validation_failure_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        // Both records malformed: rate 1.0 over the 0.5 threshold
        let partition = dir.path().join("telegram_messages/2026-08-07");
        fs::create_dir_all(&partition).unwrap();
        fs::write(
            partition.join("chemed.json"),
            r#"[{"message_id": "x"}, {"channel_name": "chemed"}]"#,
        )
        .unwrap();

        let reporter = Arc::new(RecordingReporter::default());
        let sink = Arc::new(MemoryWarehouse::new());
        let exec = executor(
            test_config(dir.path()),
            Arc::new(ScriptedRunner::ok()),
            sink.clone(),
            reporter.clone(),
        );

        let run = exec.execute(TriggerKind::Manual).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            run.stage(StageName::LoadRaw).unwrap().status,
            StageStatus::Failed
        );
        assert_eq!(sink.message_count().await, 0);

        let events = reporter.events.lock().unwrap();
        assert_eq!(events[0].failed_stage, StageName::LoadRaw);
        assert!(events[0].reason.contains("validation"));
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_everything() {
        let dir = tempfile::tempdir().unwrap();

        let reporter = Arc::new(RecordingReporter::default());
        let exec = executor(
            test_config(dir.path()),
            Arc::new(ScriptedRunner::ok()),
            Arc::new(MemoryWarehouse::new()),
            reporter.clone(),
        );

        let (tx, rx) = watch::channel(true);
        let run = exec.execute_with_cancel(TriggerKind::Manual, rx).await;
        drop(tx);

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            run.stage(StageName::Scrape).unwrap().status,
            StageStatus::Failed
        );
        assert!(run
            .stage(StageName::Scrape)
            .unwrap()
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("cancelled"));
        for stage in &StageName::ALL[1..] {
            assert_eq!(run.stage(*stage).unwrap().status, StageStatus::Skipped);
        }
        assert_eq!(reporter.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_summary_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path().join("runs")).unwrap();

        let exec = executor(
            test_config(dir.path()),
            Arc::new(ScriptedRunner::ok()),
            Arc::new(MemoryWarehouse::new()),
            Arc::new(RecordingReporter::default()),
        )
        .with_store(store);

        let run = exec.execute(TriggerKind::Manual).await;

        let saved = RunStore::new(dir.path().join("runs"))
            .unwrap()
            .load(run.id)
            .unwrap();
        assert_eq!(saved.id, run.id);
        assert_eq!(saved.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_retriggered_run_converges_to_same_rows() {
        let dir = tempfile::tempdir().unwrap();
        write_scrape_artifact(dir.path());
        write_detection_artifact(dir.path());

        let sink = Arc::new(MemoryWarehouse::new());
        let exec = executor(
            test_config(dir.path()),
            Arc::new(ScriptedRunner::ok()),
            sink.clone(),
            Arc::new(RecordingReporter::default()),
        );

        let first = exec.execute(TriggerKind::Scheduled).await;
        assert_eq!(first.status, RunStatus::Succeeded);
        let rows = sink.message_rows().await;

        let second = exec.execute(TriggerKind::Manual).await;
        assert_eq!(second.status, RunStatus::Succeeded);
        assert_eq!(sink.message_rows().await, rows);
        assert_eq!(sink.detection_count().await, 2);
    }
}
