use std::str::FromStr;

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 10)
    pub db_max_connections: u32,

    /// Redis connection string; enables the cross-process task run lock when set
    pub redis_url: Option<String>,

    /// SMTP server identifier understood by the mail sender (default: "163")
    pub smtp_server: String,

    /// Sender mailbox account, also used as the `From` address
    pub email_account: String,

    /// SMTP authorization code for `email_account`
    pub email_auth_code: String,

    /// Mail sender executable
    pub mail_bin: String,

    /// Interpreter used to run the content source script
    pub catcher_interpreter: String,

    /// Content source script path
    pub catcher_script: String,

    /// Parent directory for per-delivery attachment directories
    pub cache_dir: String,

    /// Seconds between dispatch cycles (default: 1800 = 30 min)
    pub dispatch_interval_secs: u64,

    /// Maximum number of fetch tasks executing at once (default: 3)
    pub dispatch_max_concurrent: usize,

    /// Delay between consecutive task launches in milliseconds (default: 2000)
    pub dispatch_stagger_ms: u64,

    /// Per-attachment download cap in megabytes (default: 15)
    pub attachment_max_mb: u32,

    /// UTC offset of the configured timezone in hours (default: 8, Asia/Shanghai)
    pub utc_offset_hours: i32,

    /// Fire one dispatch cycle immediately at startup
    pub run_on_start: bool,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_var(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            redis_url: lookup("REDIS_URL").filter(|url| !url.trim().is_empty()),
            smtp_server: or("NOTICAT_SMTP_SERVER", "163"),
            email_account: or("NOTICAT_EMAIL_ACCOUNT", ""),
            email_auth_code: or("NOTICAT_EMAIL_AUTHCODE", ""),
            mail_bin: or("NOTICAT_MAIL_BIN", "mail/bin/send"),
            catcher_interpreter: or("NOTICAT_CATCHER_INTERPRETER", "python3"),
            catcher_script: or("NOTICAT_CATCHER_SCRIPT", "scripts/catcher.py"),
            cache_dir: or("NOTICAT_CACHE_DIR", ".cache"),
            dispatch_interval_secs: parse_nonzero(&lookup, "NOTICAT_DISPATCH_INTERVAL_SECS", 1800)?,
            dispatch_max_concurrent: parse_var(&lookup, "NOTICAT_DISPATCH_MAX_CONCURRENT", 3)?,
            dispatch_stagger_ms: parse_var(&lookup, "NOTICAT_DISPATCH_STAGGER_MS", 2000)?,
            attachment_max_mb: parse_var(&lookup, "NOTICAT_ATTACHMENT_MAX_MB", 15)?,
            utc_offset_hours: parse_var(&lookup, "NOTICAT_UTC_OFFSET_HOURS", 8)?,
            run_on_start: parse_var(&lookup, "NOTICAT_RUN_ON_START", false)?,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                key,
                std::any::type_name::<T>()
            )
        }),
        None => Ok(default),
    }
}

fn parse_nonzero<F>(lookup: &F, key: &str, default: u64) -> anyhow::Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_var(lookup, key, default)?;
    if value == 0 {
        anyhow::bail!("{} must be greater than zero", key);
    }
    Ok(value)
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("db_max_connections", &self.db_max_connections)
            .field("redis_enabled", &self.redis_url.is_some())
            .field("smtp_server", &self.smtp_server)
            .field("email_account", &self.email_account)
            .field("mail_bin", &self.mail_bin)
            .field("catcher_interpreter", &self.catcher_interpreter)
            .field("catcher_script", &self.catcher_script)
            .field("cache_dir", &self.cache_dir)
            .field("dispatch_interval_secs", &self.dispatch_interval_secs)
            .field("dispatch_max_concurrent", &self.dispatch_max_concurrent)
            .field("dispatch_stagger_ms", &self.dispatch_stagger_ms)
            .field("attachment_max_mb", &self.attachment_max_mb)
            .field("utc_offset_hours", &self.utc_offset_hours)
            .field("run_on_start", &self.run_on_start)
            .finish_non_exhaustive()
    }
}
