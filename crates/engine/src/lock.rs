//! Cross-process task run lock.
//!
//! Within one dispatcher a task is never executed twice per tick. When several
//! dispatchers share a database, this lock keeps them from fetching the same
//! task at the same time. It is advisory: the delivery ledger already
//! guarantees at-most-once delivery.
//!
//! Uses Redis `SET NX PX` with a random token, released by a Lua
//! compare-and-delete so a holder never removes someone else's lock.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use noticat_common::error::AppError;

/// Default lock lifetime. Long enough for a slow task, short enough that a
/// crashed holder does not block the next tick.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(25 * 60);

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[async_trait]
pub trait RunLock: Send + Sync {
    /// Try to take the lock for `task_id`. Returns the holder token, or
    /// `None` when somebody else holds it.
    async fn try_acquire(&self, task_id: Uuid) -> Result<Option<String>, AppError>;

    /// Release a lock previously returned by [`RunLock::try_acquire`].
    async fn release(&self, task_id: Uuid, token: &str) -> Result<(), AppError>;
}

/// Redis-backed [`RunLock`].
#[derive(Clone)]
pub struct RedisRunLock {
    redis: ConnectionManager,
    ttl: Duration,
}

impl RedisRunLock {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            ttl: DEFAULT_LOCK_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn key(task_id: Uuid) -> String {
        format!("lock:task:{}", task_id)
    }
}

#[async_trait]
impl RunLock for RedisRunLock {
    async fn try_acquire(&self, task_id: Uuid) -> Result<Option<String>, AppError> {
        let mut redis = self.redis.clone();
        let token = Uuid::new_v4().to_string();

        // Some("OK") when set, None when the key already exists
        let result: Option<String> = redis::cmd("SET")
            .arg(Self::key(task_id))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl.as_millis() as u64)
            .query_async(&mut redis)
            .await?;

        if result.is_none() {
            tracing::debug!(task_id = %task_id, "Task run lock held elsewhere");
            return Ok(None);
        }

        Ok(Some(token))
    }

    async fn release(&self, task_id: Uuid, token: &str) -> Result<(), AppError> {
        let mut redis = self.redis.clone();
        let removed: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(Self::key(task_id))
            .arg(token)
            .invoke_async(&mut redis)
            .await?;

        if removed == 0 {
            tracing::warn!(task_id = %task_id, "Task run lock expired before release");
        }
        Ok(())
    }
}
