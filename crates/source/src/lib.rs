//! Content source adapter contract.
//!
//! The engine never scrapes anything itself. It talks to a content source
//! through [`ContentSource`], which lists notices, fetches a notice's detail
//! page and downloads single attachments. [`process::ProcessContentSource`]
//! is the production implementation that shells out to the catcher script.

pub mod process;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use noticat_common::error::AppError;
use noticat_common::types::{ClientType, FetchTask, Notice, NoticeDetail};

pub use process::ProcessContentSource;

/// Errors raised by a content source invocation.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to launch content source: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("content source {action} exited with code {code:?}: {stderr}")]
    Exit {
        action: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[error("content source {action} returned malformed output: {source}")]
    Malformed {
        action: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode options: {0}")]
    Options(serde_json::Error),

    #[error("content source rejected download of {url}")]
    Rejected { url: String },
}

impl From<SourceError> for AppError {
    fn from(err: SourceError) -> Self {
        AppError::Source(err.to_string())
    }
}

/// Everything the adapter needs to talk to one content source on behalf of
/// one fetch task.
#[derive(Clone)]
pub struct FetchContext {
    pub client: ClientType,
    pub account: String,
    pub password: String,
    /// Free-form options forwarded to the adapter untouched.
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl FetchContext {
    /// Build a context from a stored task.
    ///
    /// Fails fast on an unsupported client. Missing `account` / `password`
    /// credentials become empty strings and an absent options bag becomes the
    /// empty map.
    pub fn from_task(task: &FetchTask) -> Result<Self, AppError> {
        let client: ClientType = task.client.parse()?;

        let credentials = as_object(&task.credentials, "credentials")?;
        let account = string_field(&credentials, "account");
        let password = string_field(&credentials, "password");
        let options = as_object(&task.extra, "extra")?;

        Ok(Self {
            client,
            account,
            password,
            options,
        })
    }
}

fn as_object(
    value: &serde_json::Value,
    what: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, AppError> {
    match value {
        serde_json::Value::Null => Ok(serde_json::Map::new()),
        serde_json::Value::Object(map) => Ok(map.clone()),
        other => Err(AppError::InvalidTask(format!(
            "{} must be a JSON object, got {}",
            what, other
        ))),
    }
}

fn string_field(map: &serde_json::Map<String, serde_json::Value>, key: &str) -> String {
    map.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

impl std::fmt::Debug for FetchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchContext")
            .field("client", &self.client)
            .field("account", &self.account)
            .field("password", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}

/// A single attachment download.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    /// Size cap in megabytes; the adapter refuses larger payloads.
    pub max_size_mb: u32,
    pub save_path: PathBuf,
    /// Page the attachment was linked from.
    pub referer: String,
}

/// Out-of-process content source.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// List the notices currently published by the source.
    async fn list(&self, ctx: &FetchContext) -> Result<Vec<Notice>, SourceError>;

    /// Fetch the body and attachment list of one notice.
    async fn detail(&self, ctx: &FetchContext, url: &str) -> Result<NoticeDetail, SourceError>;

    /// Download one attachment to `request.save_path`.
    async fn download(
        &self,
        ctx: &FetchContext,
        request: &DownloadRequest,
    ) -> Result<(), SourceError>;
}
