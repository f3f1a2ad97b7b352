// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Run scheduling
//!
//! Triggers one run per daily tick and exposes the manual trigger. The
//! one-run-at-a-time invariant is owned, lockable state here: an
//! overlapping trigger is rejected with `AlreadyRunning`, never silently
//! queued or dropped. Missed ticks are not backfilled; the next tick
//! starts fresh.

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Utc};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::config::ScheduleConfig;
use crate::errors::{TeleflowError, TeleflowResult};
use crate::pipeline::{wait_cancelled, Run, RunExecutor, TriggerKind};

/// Owns the single-flight invariant across scheduled and manual triggers
pub struct Scheduler {
    executor: Arc<RunExecutor>,
    schedule: ScheduleConfig,
    in_flight: Mutex<()>,
    current: StdMutex<Option<Uuid>>,
}

impl Scheduler {
    pub fn new(executor: Arc<RunExecutor>, schedule: ScheduleConfig) -> Self {
        Self {
            executor,
            schedule,
            in_flight: Mutex::new(()),
            current: StdMutex::new(None),
        }
    }

    /// Id of the run currently executing, if any
    pub fn active_run(&self) -> Option<Uuid> {
        *self.current.lock().expect("current-run lock")
    }

    /// Trigger one run now.
    ///
    /// Rejects with `AlreadyRunning` if a run is still executing.
    pub async fn trigger(
        &self,
        trigger: TriggerKind,
        cancel: watch::Receiver<bool>,
    ) -> TeleflowResult<Run> {
        let _guard = self.in_flight.try_lock().map_err(|_| {
            let run_id = self.active_run().unwrap_or_else(Uuid::nil);
            TeleflowError::AlreadyRunning { run_id }
        })?;

        let run = self.executor.prepare(trigger);
        *self.current.lock().expect("current-run lock") = Some(run.id);

        let run = self.executor.execute_prepared(run, cancel).await;

        *self.current.lock().expect("current-run lock") = None;
        Ok(run)
    }

    /// Next tick strictly after `now`, in the schedule's timezone.
    pub fn next_tick(&self, now: DateTime<FixedOffset>) -> TeleflowResult<DateTime<FixedOffset>> {
        let time = self.schedule.time_of_day()?;
        let offset = self.schedule.offset()?;

        let local_now = now.with_timezone(&offset);
        let today = local_now
            .date_naive()
            .and_time(time)
            .and_local_timezone(offset)
            .single()
            .expect("fixed offsets are unambiguous");

        if today > local_now {
            Ok(today)
        } else {
            Ok(today + ChronoDuration::days(1))
        }
    }

    /// Daemon loop: sleep until each tick, trigger a scheduled run, repeat.
    ///
    /// Returns when `shutdown` flips to true; an active run receives the
    /// same signal and cancels.
    pub async fn run_forever(&self, shutdown: watch::Receiver<bool>) -> TeleflowResult<()> {
        let offset = self.schedule.offset()?;

        loop {
            let now = Utc::now().with_timezone(&offset);
            let next = self.next_tick(now)?;
            let wait = (next - now).to_std().unwrap_or_default();

            tracing::info!(next_tick = %next, "scheduler waiting for next tick");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    match self.trigger(TriggerKind::Scheduled, shutdown.clone()).await {
                        Ok(run) => {
                            tracing::info!(run_id = %run.id, status = ?run.status, "scheduled run finished");
                        }
                        Err(TeleflowError::AlreadyRunning { run_id }) => {
                            // The previous run is still going; this tick is
                            // dropped, not queued
                            tracing::warn!(%run_id, "tick skipped, a run is still in progress");
                        }
                        Err(e) => return Err(e),
                    }
                }
                _ = wait_cancelled(shutdown.clone()) => {
                    tracing::info!("scheduler shutting down");
                    return Ok(());
                }
            }
        }
    }
}
