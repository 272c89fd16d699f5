//! Deduplication and filtering of listed notices.
//!
//! Every (user, notice) pair is first claimed in the delivery ledger. Only the
//! caller that creates the record goes on to filtering; everyone else sees
//! [`Verdict::AlreadySeen`]. The record is written before any mail is sent, so
//! a notice whose delivery later fails is still considered seen.

use std::sync::Arc;

use uuid::Uuid;

use noticat_common::error::AppError;
use noticat_common::types::{ClientType, Notice};

use crate::filter::FilterSet;
use crate::store::NoticeStore;

/// Outcome of running one notice through the gate for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The user was already considered for this content.
    AlreadySeen,
    /// New content that none of the subscription's filters accept.
    Filtered,
    /// New content that should be delivered.
    Deliver,
}

impl Verdict {
    pub fn should_deliver(self) -> bool {
        self == Verdict::Deliver
    }
}

/// Decides whether a notice is new for a user and passes their filters.
#[derive(Clone)]
pub struct NoticeGate {
    store: Arc<dyn NoticeStore>,
}

impl NoticeGate {
    pub fn new(store: Arc<dyn NoticeStore>) -> Self {
        Self { store }
    }

    pub async fn decide(
        &self,
        user_id: Uuid,
        client: ClientType,
        notice: &Notice,
        filters: &FilterSet,
    ) -> Result<Verdict, AppError> {
        let content_hash = notice.content_hash();

        let created = self
            .store
            .claim_notice(user_id, client.as_str(), &content_hash)
            .await?;
        if !created {
            tracing::trace!(
                user_id = %user_id,
                client = %client,
                content_hash = %content_hash,
                "Notice already seen"
            );
            return Ok(Verdict::AlreadySeen);
        }

        if filters.matches(&notice.title) {
            Ok(Verdict::Deliver)
        } else {
            tracing::debug!(
                user_id = %user_id,
                title = %notice.title,
                "Notice rejected by subscription filters"
            );
            Ok(Verdict::Filtered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use noticat_common::types::FetchTask;

    use crate::filter::CompiledFilter;
    use crate::store::LoadedSubscription;

    /// Ledger-only store: enough to exercise the gate.
    #[derive(Default)]
    struct LedgerStore {
        records: Mutex<HashSet<(Uuid, String, String)>>,
    }

    #[async_trait]
    impl NoticeStore for LedgerStore {
        async fn list_tasks(&self) -> Result<Vec<FetchTask>, AppError> {
            Ok(vec![])
        }

        async fn touch_task(&self, _task_id: Uuid, _at: DateTime<Utc>) -> Result<(), AppError> {
            Ok(())
        }

        async fn load_subscriptions(
            &self,
            _task_id: Uuid,
        ) -> Result<Vec<LoadedSubscription>, AppError> {
            Ok(vec![])
        }

        async fn claim_notice(
            &self,
            user_id: Uuid,
            client: &str,
            content_hash: &str,
        ) -> Result<bool, AppError> {
            let mut records = self.records.lock().unwrap();
            Ok(records.insert((user_id, client.to_string(), content_hash.to_string())))
        }
    }

    fn notice(title: &str, url: &str) -> Notice {
        Notice {
            title: title.to_string(),
            url: url.to_string(),
            date: String::new(),
        }
    }

    #[tokio::test]
    async fn test_first_claim_delivers_second_is_seen() {
        let gate = NoticeGate::new(Arc::new(LedgerStore::default()));
        let user = Uuid::new_v4();
        let n = notice("Midterm Exam Notice", "u1");
        let none = FilterSet::default();

        let first = gate.decide(user, ClientType::Bili, &n, &none).await.unwrap();
        let second = gate.decide(user, ClientType::Bili, &n, &none).await.unwrap();
        assert_eq!(first, Verdict::Deliver);
        assert_eq!(second, Verdict::AlreadySeen);
    }

    #[tokio::test]
    async fn test_whitespace_variants_share_a_record() {
        let gate = NoticeGate::new(Arc::new(LedgerStore::default()));
        let user = Uuid::new_v4();
        let none = FilterSet::default();

        let first = gate
            .decide(user, ClientType::Bupt, &notice("Notice", "u1"), &none)
            .await
            .unwrap();
        let padded = gate
            .decide(user, ClientType::Bupt, &notice("  Notice ", " u1\n"), &none)
            .await
            .unwrap();
        assert!(first.should_deliver());
        assert_eq!(padded, Verdict::AlreadySeen);
    }

    #[tokio::test]
    async fn test_records_are_per_user_and_client() {
        let gate = NoticeGate::new(Arc::new(LedgerStore::default()));
        let n = notice("Notice", "u1");
        let none = FilterSet::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(gate.decide(a, ClientType::Bili, &n, &none).await.unwrap().should_deliver());
        assert!(gate.decide(b, ClientType::Bili, &n, &none).await.unwrap().should_deliver());
        assert!(gate.decide(a, ClientType::Bupt, &n, &none).await.unwrap().should_deliver());
    }

    #[tokio::test]
    async fn test_filtered_notice_still_marked_seen() {
        let gate = NoticeGate::new(Arc::new(LedgerStore::default()));
        let user = Uuid::new_v4();
        let n = notice("Sports Day", "u2");
        let exam_only = FilterSet::from(vec![CompiledFilter::keyword("exam", true)]);

        let first = gate.decide(user, ClientType::Bili, &n, &exam_only).await.unwrap();
        let second = gate
            .decide(user, ClientType::Bili, &n, &FilterSet::default())
            .await
            .unwrap();
        assert_eq!(first, Verdict::Filtered);
        assert_eq!(second, Verdict::AlreadySeen);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_deliver_once() {
        let gate = NoticeGate::new(Arc::new(LedgerStore::default()));
        let user = Uuid::new_v4();
        let n = notice("Midterm Exam Notice", "u1");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let gate = gate.clone();
            let n = n.clone();
            handles.push(tokio::spawn(async move {
                gate.decide(user, ClientType::Bili, &n, &FilterSet::default())
                    .await
                    .unwrap()
            }));
        }

        let mut delivered = 0;
        for handle in handles {
            if handle.await.unwrap().should_deliver() {
                delivered += 1;
            }
        }
        assert_eq!(delivered, 1);
    }
}
