//! Task executor.
//!
//! Runs one fetch task end to end: list notices, load subscriptions, then for
//! every subscription (in load order) and every notice (in listing order) run
//! the notice gate and, when it says so, the delivery cascade.
//!
//! Processing inside one task is strictly sequential. Parallelism only exists
//! across tasks, in the scheduler.

use std::sync::Arc;

use noticat_common::error::AppError;
use noticat_common::types::{FetchTask, Notice, SUBJECT_PREFIX};
use noticat_notifier::OutgoingMail;
use noticat_source::{ContentSource, FetchContext};

use crate::clock::Clock;
use crate::dedup::{NoticeGate, Verdict};
use crate::delivery::DeliveryCascade;
use crate::filter::FilterSet;
use crate::store::NoticeStore;

/// Counters for one task run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskReport {
    pub notices: usize,
    pub subscriptions: usize,
    pub already_seen: usize,
    pub filtered: usize,
    pub delivered: usize,
    pub send_failures: usize,
}

pub struct TaskExecutor {
    store: Arc<dyn NoticeStore>,
    source: Arc<dyn ContentSource>,
    gate: NoticeGate,
    cascade: DeliveryCascade,
    clock: Arc<dyn Clock>,
}

impl TaskExecutor {
    pub fn new(
        store: Arc<dyn NoticeStore>,
        source: Arc<dyn ContentSource>,
        cascade: DeliveryCascade,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gate: NoticeGate::new(store.clone()),
            store,
            source,
            cascade,
            clock,
        }
    }

    /// Execute one task.
    ///
    /// Errors abort this task only:
    /// - unsupported client or malformed task config, before any work;
    /// - a failed listing, before the fetch timestamp is touched;
    /// - a persistence failure while loading subscriptions or claiming a
    ///   delivery record.
    ///
    /// Mail and attachment failures never surface here; they are counted in
    /// the report.
    pub async fn execute(&self, task: &FetchTask) -> Result<TaskReport, AppError> {
        let ctx = FetchContext::from_task(task)?;
        let mut report = TaskReport::default();

        let notices = self.source.list(&ctx).await?;
        report.notices = notices.len();
        self.record_fetch(task).await;

        if notices.is_empty() {
            tracing::debug!(task_id = %task.id, client = %ctx.client, "No notices listed");
            return Ok(report);
        }

        let subscriptions = self.store.load_subscriptions(task.id).await?;
        report.subscriptions = subscriptions.len();

        for loaded in &subscriptions {
            let filters = FilterSet::compile(&loaded.filters);
            let user = &loaded.user;

            for notice in &notices {
                match self.gate.decide(user.id, ctx.client, notice, &filters).await? {
                    Verdict::AlreadySeen => report.already_seen += 1,
                    Verdict::Filtered => report.filtered += 1,
                    Verdict::Deliver => {
                        let outcome = self.cascade.deliver(&ctx, notice, &user.email).await;
                        if outcome.is_sent() {
                            tracing::info!(
                                task_id = %task.id,
                                user_id = %user.id,
                                title = %notice.title,
                                outcome = ?outcome,
                                "Notice delivered"
                            );
                            report.delivered += 1;
                        } else {
                            report.send_failures += 1;
                        }
                    }
                }
            }
        }

        tracing::info!(
            task_id = %task.id,
            client = %ctx.client,
            notices = report.notices,
            subscriptions = report.subscriptions,
            delivered = report.delivered,
            filtered = report.filtered,
            already_seen = report.already_seen,
            send_failures = report.send_failures,
            "Task executed"
        );

        Ok(report)
    }

    /// List a task once and return its first notice, without touching the
    /// delivery ledger.
    ///
    /// When `recipient` is given and a notice exists, its title is mailed
    /// there as a connectivity check.
    pub async fn test_fetch(
        &self,
        task: &FetchTask,
        recipient: Option<&str>,
    ) -> Result<Option<Notice>, AppError> {
        let ctx = FetchContext::from_task(task)?;
        let notices = self.source.list(&ctx).await?;
        self.record_fetch(task).await;

        let sample = notices.into_iter().next();

        if let (Some(notice), Some(to)) = (&sample, recipient) {
            let mail = OutgoingMail {
                to: to.to_string(),
                subject: format!("{}Test Fetch", SUBJECT_PREFIX),
                body: notice.title.clone(),
                attachments: Vec::new(),
            };
            self.cascade
                .mailer()
                .send(&mail)
                .await
                .map_err(|e| AppError::Mail(e.to_string()))?;
            tracing::info!(task_id = %task.id, to = %to, "Test fetch mail sent");
        }

        Ok(sample)
    }

    /// Bump the task's fetch timestamp. A failure here does not undo a
    /// successful listing.
    async fn record_fetch(&self, task: &FetchTask) {
        if let Err(e) = self.store.touch_task(task.id, self.clock.now()).await {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to update last fetch time");
        }
    }
}
