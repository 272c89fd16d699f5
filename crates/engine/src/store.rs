//! Persistence operations the dispatch engine depends on.
//!
//! The engine reads tasks and subscriptions, bumps a task's last-fetch
//! timestamp, and claims delivery records. Claiming relies on the store's
//! unique `(user_id, client, content_hash)` constraint: the first writer
//! wins and is the only caller told it created the record.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use noticat_common::error::AppError;
use noticat_common::types::{FetchTask, Subscription, SubscriptionFilter, User};

/// A subscription with its owning user and filters eagerly loaded.
#[derive(Debug, Clone)]
pub struct LoadedSubscription {
    pub subscription: Subscription,
    pub user: User,
    /// Filters in the order they were created.
    pub filters: Vec<SubscriptionFilter>,
}

#[async_trait]
pub trait NoticeStore: Send + Sync {
    /// Every fetch task, oldest first.
    async fn list_tasks(&self) -> Result<Vec<FetchTask>, AppError>;

    /// Record a successful fetch.
    async fn touch_task(&self, task_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError>;

    /// Subscriptions of a task in creation order.
    async fn load_subscriptions(&self, task_id: Uuid) -> Result<Vec<LoadedSubscription>, AppError>;

    /// Create the delivery record for `(user, client, content_hash)` if absent.
    ///
    /// Returns `true` only for the call that created it.
    async fn claim_notice(
        &self,
        user_id: Uuid,
        client: &str,
        content_hash: &str,
    ) -> Result<bool, AppError>;
}

/// PostgreSQL-backed [`NoticeStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

/// Joined row of `subscriptions` and `users`.
#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    task_id: Uuid,
    created_at: DateTime<Utc>,
    username: String,
    email: String,
    user_created_at: DateTime<Utc>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up a single task.
    pub async fn get_task(&self, task_id: Uuid) -> Result<FetchTask, AppError> {
        sqlx::query_as("SELECT * FROM fetch_tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::InvalidTask(format!("Fetch task {} not found", task_id)))
    }
}

#[async_trait]
impl NoticeStore for PgStore {
    async fn list_tasks(&self) -> Result<Vec<FetchTask>, AppError> {
        let tasks: Vec<FetchTask> =
            sqlx::query_as("SELECT * FROM fetch_tasks ORDER BY created_at, id")
                .fetch_all(&self.pool)
                .await?;
        Ok(tasks)
    }

    async fn touch_task(&self, task_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE fetch_tasks SET last_fetch_at = $1 WHERE id = $2")
            .bind(at)
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_subscriptions(&self, task_id: Uuid) -> Result<Vec<LoadedSubscription>, AppError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT s.id, s.user_id, s.task_id, s.created_at,
                   u.username, u.email, u.created_at AS user_created_at
            FROM subscriptions s
            JOIN users u ON u.id = s.user_id
            WHERE s.task_id = $1
            ORDER BY s.created_at, s.id
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let filters: Vec<SubscriptionFilter> = sqlx::query_as(
            r#"
            SELECT * FROM subscription_filters
            WHERE subscription_id = ANY($1)
            ORDER BY created_at, id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_subscription: HashMap<Uuid, Vec<SubscriptionFilter>> = HashMap::new();
        for filter in filters {
            by_subscription
                .entry(filter.subscription_id)
                .or_default()
                .push(filter);
        }

        Ok(rows
            .into_iter()
            .map(|row| LoadedSubscription {
                filters: by_subscription.remove(&row.id).unwrap_or_default(),
                subscription: Subscription {
                    id: row.id,
                    user_id: row.user_id,
                    task_id: row.task_id,
                    created_at: row.created_at,
                },
                user: User {
                    id: row.user_id,
                    username: row.username,
                    email: row.email,
                    created_at: row.user_created_at,
                },
            })
            .collect())
    }

    async fn claim_notice(
        &self,
        user_id: Uuid,
        client: &str,
        content_hash: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_notices (user_id, client, content_hash)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, client, content_hash) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(client)
        .bind(content_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
