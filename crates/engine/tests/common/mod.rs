//! In-memory fakes for the engine's collaborators.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use noticat_common::error::AppError;
use noticat_common::types::{
    Attachment, FetchTask, FilterKind, Notice, NoticeDetail, Subscription, SubscriptionFilter,
    User,
};
use noticat_engine::clock::Clock;
use noticat_engine::delivery::DeliveryCascade;
use noticat_engine::executor::TaskExecutor;
use noticat_engine::store::{LoadedSubscription, NoticeStore};
use noticat_notifier::{MailSender, NotifierError, OutgoingMail};
use noticat_source::{ContentSource, DownloadRequest, FetchContext, SourceError};

// ============================================================
// Builders
// ============================================================

pub fn make_task(client: &str, account: &str) -> FetchTask {
    let credentials = serde_json::json!({"account": account, "password": "secret"});
    let extra = serde_json::json!({});
    FetchTask {
        id: Uuid::new_v4(),
        logic_hash: FetchTask::logic_hash(client, &credentials, &extra),
        client: client.to_string(),
        credentials,
        extra,
        last_fetch_at: None,
        created_at: Utc::now(),
    }
}

pub fn make_user(name: &str) -> User {
    User {
        id: Uuid::new_v4(),
        username: name.to_string(),
        email: format!("{}@example.com", name),
        created_at: Utc::now(),
    }
}

pub fn make_filter(kind: FilterKind, pattern: &str, ignore_case: bool) -> SubscriptionFilter {
    SubscriptionFilter {
        id: Uuid::new_v4(),
        subscription_id: Uuid::nil(),
        kind,
        pattern: pattern.to_string(),
        ignore_case,
        created_at: Utc::now(),
    }
}

pub fn notice(title: &str, url: &str) -> Notice {
    Notice {
        title: title.to_string(),
        url: url.to_string(),
        date: "2026-01-01".to_string(),
    }
}

pub fn attachment(title: &str, url: &str) -> Attachment {
    Attachment {
        title: title.to_string(),
        url: url.to_string(),
    }
}

pub fn context(client: &str, account: &str) -> FetchContext {
    FetchContext::from_task(&make_task(client, account)).unwrap()
}

// ============================================================
// Store
// ============================================================

#[derive(Default)]
pub struct MemoryStore {
    tasks: Mutex<Vec<FetchTask>>,
    subscriptions: Mutex<HashMap<Uuid, Vec<LoadedSubscription>>>,
    claims: Mutex<HashSet<(Uuid, String, String)>>,
    touched: Mutex<Vec<(Uuid, DateTime<Utc>)>>,
    unreachable: AtomicBool,
}

impl MemoryStore {
    pub fn add_task(&self, task: FetchTask) {
        self.tasks.lock().unwrap().push(task);
    }

    pub fn subscribe(&self, task_id: Uuid, user: User, filters: Vec<SubscriptionFilter>) {
        let subscription = Subscription {
            id: Uuid::new_v4(),
            user_id: user.id,
            task_id,
            created_at: Utc::now(),
        };
        let filters = filters
            .into_iter()
            .map(|f| SubscriptionFilter {
                subscription_id: subscription.id,
                ..f
            })
            .collect();
        self.subscriptions
            .lock()
            .unwrap()
            .entry(task_id)
            .or_default()
            .push(LoadedSubscription {
                subscription,
                user,
                filters,
            });
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn claim_count(&self) -> usize {
        self.claims.lock().unwrap().len()
    }

    pub fn touched(&self) -> Vec<(Uuid, DateTime<Utc>)> {
        self.touched.lock().unwrap().clone()
    }

    fn check_reachable(&self) -> Result<(), AppError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl NoticeStore for MemoryStore {
    async fn list_tasks(&self) -> Result<Vec<FetchTask>, AppError> {
        self.check_reachable()?;
        Ok(self.tasks.lock().unwrap().clone())
    }

    async fn touch_task(&self, task_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        self.check_reachable()?;
        self.touched.lock().unwrap().push((task_id, at));
        Ok(())
    }

    async fn load_subscriptions(&self, task_id: Uuid) -> Result<Vec<LoadedSubscription>, AppError> {
        self.check_reachable()?;
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .get(&task_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn claim_notice(
        &self,
        user_id: Uuid,
        client: &str,
        content_hash: &str,
    ) -> Result<bool, AppError> {
        self.check_reachable()?;
        Ok(self.claims.lock().unwrap().insert((
            user_id,
            client.to_string(),
            content_hash.to_string(),
        )))
    }
}

// ============================================================
// Content source
// ============================================================

/// Scriptable content source. Notices are keyed by account so that several
/// tasks can share one fake.
#[derive(Default)]
pub struct FakeSource {
    notices: Mutex<HashMap<String, Vec<Notice>>>,
    details: Mutex<HashMap<String, NoticeDetail>>,
    failing_lists: Mutex<HashSet<String>>,
    failing_downloads: Mutex<HashSet<String>>,
    panicking_accounts: Mutex<HashSet<String>>,
    list_delay: Mutex<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    launches: Mutex<Vec<Instant>>,
    downloads: Mutex<Vec<DownloadRequest>>,
}

impl FakeSource {
    pub fn set_notices(&self, account: &str, notices: Vec<Notice>) {
        self.notices
            .lock()
            .unwrap()
            .insert(account.to_string(), notices);
    }

    pub fn set_detail(&self, url: &str, body: &str, attachments: Vec<Attachment>) {
        self.details.lock().unwrap().insert(
            url.to_string(),
            NoticeDetail {
                body: body.to_string(),
                attachments,
            },
        );
    }

    pub fn fail_list(&self, account: &str) {
        self.failing_lists
            .lock()
            .unwrap()
            .insert(account.to_string());
    }

    pub fn fail_download(&self, url: &str) {
        self.failing_downloads
            .lock()
            .unwrap()
            .insert(url.to_string());
    }

    pub fn panic_on(&self, account: &str) {
        self.panicking_accounts
            .lock()
            .unwrap()
            .insert(account.to_string());
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> Vec<Instant> {
        self.launches.lock().unwrap().clone()
    }

    pub fn downloads(&self) -> Vec<DownloadRequest> {
        self.downloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    async fn list(&self, ctx: &FetchContext) -> Result<Vec<Notice>, SourceError> {
        self.launches.lock().unwrap().push(Instant::now());

        if self.panicking_accounts.lock().unwrap().contains(&ctx.account) {
            panic!("catcher crashed for {}", ctx.account);
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.failing_lists.lock().unwrap().contains(&ctx.account) {
            return Err(SourceError::Exit {
                action: "list",
                code: Some(1),
                stderr: "login failed".to_string(),
            });
        }

        Ok(self
            .notices
            .lock()
            .unwrap()
            .get(&ctx.account)
            .cloned()
            .unwrap_or_default())
    }

    async fn detail(&self, _ctx: &FetchContext, url: &str) -> Result<NoticeDetail, SourceError> {
        self.details
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| SourceError::Exit {
                action: "detail",
                code: Some(1),
                stderr: format!("no detail for {}", url),
            })
    }

    async fn download(
        &self,
        _ctx: &FetchContext,
        request: &DownloadRequest,
    ) -> Result<(), SourceError> {
        self.downloads.lock().unwrap().push(request.clone());

        if self.failing_downloads.lock().unwrap().contains(&request.url) {
            return Err(SourceError::Rejected {
                url: request.url.clone(),
            });
        }

        std::fs::write(&request.save_path, format!("payload of {}", request.url))?;
        Ok(())
    }
}

// ============================================================
// Mail sender
// ============================================================

/// A mail as the sender saw it.
#[derive(Debug, Clone)]
pub struct SentMail {
    pub mail: OutgoingMail,
    /// Whether every attachment path existed at send time.
    pub attachments_present: bool,
}

#[derive(Default)]
pub struct FakeMailer {
    sent: Mutex<Vec<SentMail>>,
    failing: AtomicBool,
}

impl FakeMailer {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, to: &str) -> Vec<OutgoingMail> {
        self.sent()
            .into_iter()
            .filter(|s| s.mail.to == to)
            .map(|s| s.mail)
            .collect()
    }
}

#[async_trait]
impl MailSender for FakeMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotifierError> {
        let attachments_present = mail.attachments.iter().all(|p| p.exists());
        self.sent.lock().unwrap().push(SentMail {
            mail: mail.clone(),
            attachments_present,
        });

        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifierError::Exit {
                code: Some(1),
                stderr: "smtp authentication failed".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================
// Clock + wiring
// ============================================================

pub struct FixedClock(pub DateTime<Utc>);

impl Default for FixedClock {
    fn default() -> Self {
        Self(Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Everything an executor needs, with a throwaway cache directory.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub source: Arc<FakeSource>,
    pub mailer: Arc<FakeMailer>,
    pub cache: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::default()),
            source: Arc::new(FakeSource::default()),
            mailer: Arc::new(FakeMailer::default()),
            cache: tempfile::tempdir().unwrap(),
        }
    }

    pub fn cache_root(&self) -> PathBuf {
        self.cache.path().join("cache")
    }

    pub fn cascade(&self) -> DeliveryCascade {
        DeliveryCascade::new(self.source.clone(), self.mailer.clone(), self.cache_root())
    }

    pub fn executor(&self) -> TaskExecutor {
        TaskExecutor::new(
            self.store.clone(),
            self.source.clone(),
            self.cascade(),
            Arc::new(FixedClock::default()),
        )
    }
}

/// Entries left under a cache root, ignoring a missing root.
pub fn leftover_entries(root: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(root) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}
