use thiserror::Error;

/// Common error types used across the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported client: {0}")]
    UnsupportedClient(String),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Content source error: {0}")]
    Source(String),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the error means the backing store could not be reached.
    pub fn is_persistence(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::Redis(_))
    }
}
