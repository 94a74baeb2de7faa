//! Scheduler runtime — live trigger bindings over durable task rows.
//!
//! Bindings are in-memory only and rebuilt from the store on `start()`;
//! restarts lose nothing. A tokio interval tick collects due bindings
//! and hands each firing to a bounded worker pool. Errors inside a
//! firing are caught and logged; they never crash the runtime or drop a
//! recurring task's future firings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, FixedOffset, Utc};
use outreach_core::config::SchedulerConfig;
use outreach_core::error::{OutreachError, Result};
use outreach_core::types::{Cadence, ScheduledTask, TaskStatus, TriggerOrigin};
use outreach_store::{RunOutcome, Store};
use tokio::sync::Semaphore;

use crate::cadence;
use crate::dispatch::{DispatchReport, Dispatcher};

/// One live trigger. Recurring bindings advance their own next-run at
/// fire time so a slow execution cannot re-fire the same slot.
struct Binding {
    cadence: Cadence,
    start_time: DateTime<Utc>,
    next_run: Option<DateTime<Utc>>,
    one_shot: bool,
}

pub struct Runtime {
    store: Arc<Store>,
    dispatcher: Arc<Dispatcher>,
    config: SchedulerConfig,
    tz: FixedOffset,
    bindings: Mutex<HashMap<String, Binding>>,
    in_flight: Mutex<HashMap<String, usize>>,
    workers: Arc<Semaphore>,
    running: AtomicBool,
}

impl Runtime {
    pub fn new(
        store: Arc<Store>,
        dispatcher: Arc<Dispatcher>,
        config: SchedulerConfig,
        tz: FixedOffset,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
        Self {
            store,
            dispatcher,
            config,
            tz,
            bindings: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            workers,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Idempotent: binds all enabled, active tasks. A task that fails to
    /// bind is logged and skipped; the rest still start.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let tasks = self.store.load_schedulable_tasks()?;
        let count = tasks.len();
        for task in tasks {
            if let Err(e) = self.add(&task) {
                tracing::error!(task = %task.id, error = %e, "failed to bind task");
            }
        }
        tracing::info!(tasks = count, "scheduler started");
        Ok(())
    }

    /// Cancel all bindings. In-progress executions are unaffected.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.bindings.lock().unwrap().clear();
        tracing::info!("scheduler stopped");
    }

    /// Bind (or re-bind) one task, replacing any existing binding, and
    /// write the resolved next-run back onto the row. This is the only
    /// place next-run is written outside a run outcome.
    pub fn add(&self, task: &ScheduledTask) -> Result<()> {
        task.validate()?;
        let next = cadence::compute_next_run(&task.cadence, task.start_time, Utc::now(), self.tz);
        self.store.set_task_next_run(&task.id, next)?;

        let mut bindings = self.bindings.lock().unwrap();
        if task.is_schedulable() && next.is_some() {
            bindings.insert(
                task.id.clone(),
                Binding {
                    cadence: task.cadence.clone(),
                    start_time: task.start_time,
                    next_run: next,
                    one_shot: matches!(task.cadence, Cadence::Once),
                },
            );
            tracing::info!(task = %task.id, next_run = ?next, "task bound");
        } else {
            bindings.remove(&task.id);
            tracing::info!(task = %task.id, "task has no future firing; not bound");
        }
        Ok(())
    }

    /// Cancel one binding; no-op when absent. Affects only future
    /// firings.
    pub fn remove(&self, task_id: &str) {
        if self.bindings.lock().unwrap().remove(task_id).is_some() {
            tracing::info!(task = %task_id, "task binding removed");
        }
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.lock().unwrap().len()
    }

    /// Collect due bindings and spawn their executions. Returns the
    /// spawned handles so callers (and tests) can await completion.
    pub fn tick(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        self.tick_at(Utc::now())
    }

    /// `tick` against an explicit reference instant.
    pub fn tick_at(self: &Arc<Self>, now: DateTime<Utc>) -> Vec<tokio::task::JoinHandle<()>> {
        if !self.is_running() {
            return Vec::new();
        }
        let mut due = Vec::new();
        {
            let mut bindings = self.bindings.lock().unwrap();
            for (task_id, binding) in bindings.iter_mut() {
                let Some(next) = binding.next_run else { continue };
                if next > now {
                    continue;
                }
                due.push(task_id.clone());
                binding.next_run = if binding.one_shot {
                    None
                } else {
                    // Slots are minute-granular; nudging the reference
                    // past the fired slot yields the strictly-next one.
                    cadence::compute_next_run(
                        &binding.cadence,
                        binding.start_time,
                        next + Duration::minutes(1),
                        self.tz,
                    )
                };
            }
            bindings.retain(|_, b| b.next_run.is_some());
        }

        due.into_iter()
            .map(|task_id| {
                let runtime = self.clone();
                tokio::spawn(async move {
                    runtime.execute_fired_task(&task_id).await;
                })
            })
            .collect()
    }

    /// Tick loop; returns when `stop()` is called.
    pub async fn run(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.tick_interval_secs));
        tracing::info!(
            every_secs = self.config.tick_interval_secs,
            "scheduler tick loop running"
        );
        loop {
            interval.tick().await;
            if !self.is_running() {
                break;
            }
            let fired = self.tick();
            if !fired.is_empty() {
                tracing::debug!(count = fired.len(), "tasks fired");
            }
        }
    }

    /// Worker entry point for one firing: pool slot, instance cap, then
    /// the execution itself. All errors stop here.
    async fn execute_fired_task(self: &Arc<Self>, task_id: &str) {
        let permit = match self.workers.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        if !self.begin_instance(task_id) {
            tracing::warn!(
                task = %task_id,
                cap = self.config.max_task_instances,
                "skipping firing: overlapping instance cap reached"
            );
            return;
        }
        let result = self.execute_task(task_id, TriggerOrigin::Automatic).await;
        self.end_instance(task_id);
        drop(permit);
        if let Err(e) = result {
            tracing::error!(task = %task_id, error = %e, "task execution failed");
        }
    }

    /// One execution: end-time check, dispatch, statistics + next-run in
    /// a single exclusive store transaction.
    async fn execute_task(
        &self,
        task_id: &str,
        origin: TriggerOrigin,
    ) -> Result<Option<DispatchReport>> {
        let Some(task) = self.store.load_task(task_id)? else {
            tracing::warn!(task = %task_id, "fired task no longer exists");
            return Ok(None);
        };
        if !task.is_schedulable() {
            tracing::info!(task = %task_id, "task disabled or inactive; skipping");
            return Ok(None);
        }
        let now = Utc::now();
        if task.past_end(now) {
            self.store.set_task_status(task_id, TaskStatus::Completed)?;
            self.store.set_task_next_run(task_id, None)?;
            self.remove(task_id);
            tracing::info!(task = %task_id, "end time reached; task completed without sending");
            return Ok(None);
        }

        let dispatch_result = self.dispatcher.dispatch_task(&task, origin).await;
        let fired_at = Utc::now();
        let (success, failed, report) = match dispatch_result {
            Ok(report) => (report.success_count, report.run_failures(), Some(report)),
            Err(e) => {
                // The run is lost but the schedule is not: next-run is
                // still recomputed below.
                tracing::error!(task = %task_id, error = %e, "dispatch failed");
                (0, 0, None)
            }
        };

        // A once task's single opportunity is consumed by the firing
        // itself, delivered or not.
        let (next_run, new_status) = match task.cadence {
            Cadence::Once => (None, Some(TaskStatus::Completed)),
            _ => (
                cadence::compute_next_run(
                    &task.cadence,
                    task.start_time,
                    fired_at + Duration::minutes(1),
                    self.tz,
                ),
                None,
            ),
        };
        self.store.apply_run_outcome(
            task_id,
            &RunOutcome {
                success_count: success,
                failed_count: failed,
                last_run: fired_at,
                next_run,
                new_status,
            },
        )?;
        if new_status == Some(TaskStatus::Completed) {
            self.remove(task_id);
        }
        Ok(report)
    }

    /// Manual trigger, bypassing the binding. Statistics go through the
    /// same row-locked outcome path as scheduled firings.
    pub async fn fire_now(&self, task_id: &str) -> Result<DispatchReport> {
        self.execute_task(task_id, TriggerOrigin::Manual)
            .await?
            .ok_or_else(|| {
                OutreachError::Config(format!("task {task_id} is not in a runnable state"))
            })
    }

    fn begin_instance(&self, task_id: &str) -> bool {
        let mut in_flight = self.in_flight.lock().unwrap();
        let count = in_flight.entry(task_id.to_string()).or_insert(0);
        if *count >= self.config.max_task_instances.max(1) {
            return false;
        }
        *count += 1;
        true
    }

    fn end_instance(&self, task_id: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(count) = in_flight.get_mut(task_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                in_flight.remove(task_id);
            }
        }
    }
}
