//! Dispatch scheduler.
//!
//! Every tick loads all fetch tasks and runs each once through the
//! [`TaskExecutor`], with at most `max_concurrent` executors in flight and a
//! fixed stagger between launches. Each executor runs in its own tokio task,
//! so a panic inside one is caught at the join and reported for that task
//! alone.
//!
//! A tick returns only after every executor it launched has finished, which
//! keeps ticks from overlapping and a task from running twice at once.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use noticat_common::error::AppError;
use noticat_common::types::FetchTask;

use crate::clock::Ticker;
use crate::executor::{TaskExecutor, TaskReport};
use crate::lock::RunLock;
use crate::store::NoticeStore;

/// Default number of executors allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Default pause between two task launches.
pub const DEFAULT_STAGGER: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLimits {
    pub max_concurrent: usize,
    pub stagger: Duration,
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            stagger: DEFAULT_STAGGER,
        }
    }
}

/// Summary of one dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
    pub panicked: usize,
    /// Tasks whose run lock was held by another dispatcher.
    pub skipped: usize,
    /// The task list could not be loaded; nothing was dispatched.
    pub cycle_skipped: bool,
}

enum TaskOutcome {
    Completed(TaskReport),
    Failed(AppError),
    Skipped,
}

pub struct DispatchScheduler {
    store: Arc<dyn NoticeStore>,
    executor: Arc<TaskExecutor>,
    limits: DispatchLimits,
    run_lock: Option<Arc<dyn RunLock>>,
    offset: FixedOffset,
}

impl DispatchScheduler {
    pub fn new(
        store: Arc<dyn NoticeStore>,
        executor: Arc<TaskExecutor>,
        limits: DispatchLimits,
    ) -> Self {
        Self {
            store,
            executor,
            limits,
            run_lock: None,
            offset: Utc.fix(),
        }
    }

    pub fn with_run_lock(mut self, run_lock: Arc<dyn RunLock>) -> Self {
        self.run_lock = Some(run_lock);
        self
    }

    /// Timezone used when logging tick times. Out-of-range offsets fall back to UTC.
    pub fn with_utc_offset_hours(mut self, hours: i32) -> Self {
        self.offset = match FixedOffset::east_opt(hours * 3600) {
            Some(offset) => offset,
            None => {
                tracing::warn!(hours, "Invalid UTC offset, logging ticks in UTC");
                Utc.fix()
            }
        };
        self
    }

    /// Run one dispatch cycle over every stored task.
    pub async fn dispatch_all(&self) -> DispatchReport {
        let mut report = DispatchReport::default();

        let tasks = match self.store.list_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load fetch tasks, skipping cycle");
                report.cycle_skipped = true;
                return report;
            }
        };

        if tasks.is_empty() {
            tracing::debug!("No fetch tasks to dispatch");
            return report;
        }

        let slots = Arc::new(Semaphore::new(self.limits.max_concurrent.max(1)));
        let mut running: JoinSet<(Uuid, Result<TaskOutcome, tokio::task::JoinError>)> =
            JoinSet::new();
        let total = tasks.len();

        for (index, task) in tasks.into_iter().enumerate() {
            let permit = match slots.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::error!(error = %e, "Dispatch slots closed, stopping cycle");
                    break;
                }
            };

            let task_id = task.id;
            let executor = self.executor.clone();
            let run_lock = self.run_lock.clone();

            running.spawn(async move {
                let outcome = tokio::spawn(run_task(executor, run_lock, task)).await;
                drop(permit);
                (task_id, outcome)
            });
            report.dispatched += 1;
            tracing::debug!(task_id = %task_id, "Task launched");

            if index + 1 < total && !self.limits.stagger.is_zero() {
                tokio::time::sleep(self.limits.stagger).await;
            }
        }

        while let Some(joined) = running.join_next().await {
            match joined {
                Ok((task_id, Ok(TaskOutcome::Completed(task_report)))) => {
                    tracing::debug!(
                        task_id = %task_id,
                        delivered = task_report.delivered,
                        "Task completed"
                    );
                    report.completed += 1;
                }
                Ok((_, Ok(TaskOutcome::Skipped))) => report.skipped += 1,
                Ok((task_id, Ok(TaskOutcome::Failed(e)))) => {
                    tracing::error!(
                        task_id = %task_id,
                        error = %e,
                        persistence = e.is_persistence(),
                        "Task failed"
                    );
                    report.failed += 1;
                }
                Ok((task_id, Err(e))) if e.is_panic() => {
                    tracing::error!(
                        task_id = %task_id,
                        panic = %panic_message(e.into_panic()),
                        "Task panicked"
                    );
                    report.panicked += 1;
                }
                Ok((task_id, Err(e))) => {
                    tracing::error!(task_id = %task_id, error = %e, "Task was cancelled");
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Dispatch wrapper failed");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Dispatch on every tick until the ticker ends. Returns the number of
    /// cycles run.
    pub async fn run<T: Ticker>(&self, mut ticker: T) -> usize {
        let mut cycles = 0;

        while let Some(at) = ticker.tick().await {
            let local = at.with_timezone(&self.offset);
            tracing::info!(at = %local.format("%Y-%m-%d %H:%M:%S %:z"), "Dispatch cycle started");

            let report = self.dispatch_all().await;
            cycles += 1;

            tracing::info!(
                dispatched = report.dispatched,
                completed = report.completed,
                failed = report.failed,
                panicked = report.panicked,
                skipped = report.skipped,
                cycle_skipped = report.cycle_skipped,
                "Dispatch cycle finished"
            );
        }

        cycles
    }
}

/// Execute one task under the optional run lock. A panic here unwinds into
/// the surrounding spawn; the lock then expires on its own.
async fn run_task(
    executor: Arc<TaskExecutor>,
    run_lock: Option<Arc<dyn RunLock>>,
    task: FetchTask,
) -> TaskOutcome {
    let token = match &run_lock {
        Some(lock) => match lock.try_acquire(task.id).await {
            Ok(Some(token)) => Some(token),
            Ok(None) => return TaskOutcome::Skipped,
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "Run lock unavailable, running task unlocked");
                None
            }
        },
        None => None,
    };

    let result = executor.execute(&task).await;

    if let (Some(lock), Some(token)) = (&run_lock, token) {
        if let Err(e) = lock.release(task.id, &token).await {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to release run lock");
        }
    }

    match result {
        Ok(report) => TaskOutcome::Completed(report),
        Err(e) => TaskOutcome::Failed(e),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
