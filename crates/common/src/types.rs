use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Prefix placed in front of every notification subject.
pub const SUBJECT_PREFIX: &str = "[NotiCat]";

/// Maximum number of characters of a notice title kept in a mail subject.
const SUBJECT_TITLE_CHARS: usize = 20;

/// Content sources the adapter knows how to scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Bili,
    Bupt,
}

impl ClientType {
    /// Canonical identifier passed to the adapter and stored in delivery records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Bili => "bili",
            ClientType::Bupt => "bupt",
        }
    }
}

impl std::fmt::Display for ClientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ClientType {
    type Err = crate::error::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bili" => Ok(ClientType::Bili),
            "bupt" => Ok(ClientType::Bupt),
            _ => Err(crate::error::AppError::UnsupportedClient(s.to_string())),
        }
    }
}

/// Filter flavour attached to a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Keyword,
    Regex,
}

impl std::fmt::Display for FilterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterKind::Keyword => write!(f, "keyword"),
            FilterKind::Regex => write!(f, "regex"),
        }
    }
}

/// A distinct (client, credentials, options) fetch configuration shared by
/// every subscriber with identical settings.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FetchTask {
    pub id: Uuid,
    pub logic_hash: String,
    /// Raw client identifier as stored; validated at execution time.
    pub client: String,
    pub credentials: serde_json::Value,
    pub extra: serde_json::Value,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl FetchTask {
    /// Identity hash of a task configuration.
    ///
    /// Credentials and extra options are normalized first: `null` and `{}`
    /// both render as `{}`, object keys are emitted in sorted order.
    pub fn logic_hash(
        client: &str,
        credentials: &serde_json::Value,
        extra: &serde_json::Value,
    ) -> String {
        let data = format!(
            "{}|{}|{}",
            client.to_lowercase(),
            normalize_json(credentials),
            normalize_json(extra)
        );
        sha256_hex(data.as_bytes())
    }
}

fn normalize_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "{}".to_string(),
        serde_json::Value::Object(map) if map.is_empty() => "{}".to_string(),
        // serde_json's default Map is a BTreeMap, so keys serialize sorted.
        other => other.to_string(),
    }
}

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// A user's attachment to a fetch task.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A title filter owned by a subscription.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubscriptionFilter {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub kind: FilterKind,
    pub pattern: String,
    pub ignore_case: bool,
    pub created_at: DateTime<Utc>,
}

/// A notice as listed by a content source. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub date: String,
}

impl Notice {
    /// Content-addressing key used for deduplication.
    ///
    /// Leading and trailing whitespace of title and url do not affect the hash.
    pub fn content_hash(&self) -> String {
        let content = format!("{}|{}", self.title.trim(), self.url.trim());
        sha256_hex(content.as_bytes())
    }

    /// Mail subject for this notice.
    pub fn subject(&self) -> String {
        format!("{}{}", SUBJECT_PREFIX, shorten_title(&self.title))
    }
}

/// Detail page of a notice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeDetail {
    #[serde(rename = "html", default)]
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// An attachment linked from a notice detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub title: String,
    pub url: String,
}

/// Strip line breaks and keep at most the first 20 characters.
pub fn shorten_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .take(SUBJECT_TITLE_CHARS)
        .collect()
}
