//! Delivery cascade: turns an approved notice into the best email possible.
//!
//! Steps, each falling back to the best content known so far:
//! 1. Fetch the notice detail. On failure, mail the title alone.
//! 2. Create a scoped working directory. On failure, mail title + body.
//! 3. Download every attachment into it, independently. Failures become hint
//!    lines appended to the body.
//! 4. Mail title + body + the attachments that made it.
//!
//! The working directory is a [`TempDir`] owned by [`DeliveryCascade::deliver`],
//! so it is removed on every return path, including a failed send.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use noticat_common::types::{Attachment, Notice};
use noticat_notifier::{MailSender, OutgoingMail};
use noticat_source::{ContentSource, DownloadRequest, FetchContext};

/// Default per-attachment download cap in megabytes.
pub const DEFAULT_ATTACHMENT_MAX_MB: u32 = 15;

/// Name used when an attachment title sanitizes to nothing usable.
const PLACEHOLDER_FILE_NAME: &str = "unnamed_file";

/// Prefix of per-delivery working directories.
const WORK_DIR_PREFIX: &str = "noticat_";

/// What reached the user's mailbox for one notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Detail fetch failed; the mail carries only the title.
    TitleOnly,
    /// No working directory could be created; title + body, no attachments.
    WithoutAttachments,
    /// Full delivery. `missing` lists titles of attachments that failed.
    Complete {
        attached: usize,
        missing: Vec<String>,
    },
    /// The mail sender itself failed. Nothing was delivered.
    SendFailed(String),
}

impl DeliveryOutcome {
    pub fn is_sent(&self) -> bool {
        !matches!(self, DeliveryOutcome::SendFailed(_))
    }
}

/// Best-effort mail delivery with graceful degradation.
#[derive(Clone)]
pub struct DeliveryCascade {
    source: Arc<dyn ContentSource>,
    mailer: Arc<dyn MailSender>,
    cache_root: PathBuf,
    max_attachment_mb: u32,
}

impl DeliveryCascade {
    pub fn new(
        source: Arc<dyn ContentSource>,
        mailer: Arc<dyn MailSender>,
        cache_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            mailer,
            cache_root: cache_root.into(),
            max_attachment_mb: DEFAULT_ATTACHMENT_MAX_MB,
        }
    }

    pub fn with_max_attachment_mb(mut self, max_attachment_mb: u32) -> Self {
        self.max_attachment_mb = max_attachment_mb;
        self
    }

    pub fn mailer(&self) -> &Arc<dyn MailSender> {
        &self.mailer
    }

    /// Deliver `notice` to `recipient`. Never fails; the outcome says how far
    /// the cascade got.
    pub async fn deliver(
        &self,
        ctx: &FetchContext,
        notice: &Notice,
        recipient: &str,
    ) -> DeliveryOutcome {
        let subject = notice.subject();

        let detail = match self.source.detail(ctx, &notice.url).await {
            Ok(detail) => detail,
            Err(e) => {
                tracing::info!(
                    url = %notice.url,
                    error = %e,
                    "No detail available, sending title only"
                );
                return self
                    .send(recipient, subject, notice.title.clone(), Vec::new())
                    .await
                    .map_or_else(DeliveryOutcome::SendFailed, |_| DeliveryOutcome::TitleOnly);
            }
        };

        let mut body = detail.body;

        let work_dir = match self.create_work_dir() {
            Ok(dir) => dir,
            Err(e) => {
                tracing::warn!(
                    cache_root = %self.cache_root.display(),
                    error = %e,
                    "Cannot create attachment directory, sending without attachments"
                );
                return self
                    .send(recipient, subject, body, Vec::new())
                    .await
                    .map_or_else(DeliveryOutcome::SendFailed, |_| {
                        DeliveryOutcome::WithoutAttachments
                    });
            }
        };

        let (downloaded, missing) = self
            .download_attachments(ctx, notice, &detail.attachments, work_dir.path())
            .await;

        if !missing.is_empty() {
            let hints = missing_hints(&missing);
            tracing::info!(url = %notice.url, missing = missing.len(), "Attachment download summary:\n{}", hints);
            body.push_str("\n\n---\nAttachment download notes:\n");
            body.push_str(&hints);
        }

        let attached = downloaded.len();
        let outcome = self
            .send(recipient, subject, body, downloaded)
            .await
            .map_or_else(DeliveryOutcome::SendFailed, |_| DeliveryOutcome::Complete {
                attached,
                missing,
            });

        drop(work_dir);
        outcome
    }

    fn create_work_dir(&self) -> std::io::Result<TempDir> {
        std::fs::create_dir_all(&self.cache_root)?;
        tempfile::Builder::new()
            .prefix(WORK_DIR_PREFIX)
            .tempdir_in(&self.cache_root)
    }

    /// Download each attachment in listing order. Returns the saved paths and
    /// the titles of the ones that failed.
    async fn download_attachments(
        &self,
        ctx: &FetchContext,
        notice: &Notice,
        attachments: &[Attachment],
        dir: &Path,
    ) -> (Vec<PathBuf>, Vec<String>) {
        let mut downloaded = Vec::new();
        let mut missing = Vec::new();
        let mut used_names = HashSet::new();

        for (index, attachment) in attachments.iter().enumerate() {
            let base_name = sanitize_file_name(&attachment.title);
            let mut file_name = base_name.clone();
            let mut prefix = index + 1;
            while !used_names.insert(file_name.clone()) {
                file_name = format!("{}_{}", prefix, base_name);
                prefix += 1;
            }

            let request = DownloadRequest {
                url: attachment.url.clone(),
                max_size_mb: self.max_attachment_mb,
                save_path: dir.join(&file_name),
                referer: notice.url.clone(),
            };

            match self.source.download(ctx, &request).await {
                Ok(()) => downloaded.push(request.save_path),
                Err(e) => {
                    tracing::warn!(
                        attachment = %attachment.title,
                        url = %attachment.url,
                        error = %e,
                        "Attachment download failed"
                    );
                    missing.push(attachment.title.clone());
                }
            }
        }

        (downloaded, missing)
    }

    async fn send(
        &self,
        recipient: &str,
        subject: String,
        body: String,
        attachments: Vec<PathBuf>,
    ) -> Result<(), String> {
        let mail = OutgoingMail {
            to: recipient.to_string(),
            subject,
            body,
            attachments,
        };

        self.mailer.send(&mail).await.map_err(|e| {
            tracing::error!(to = %recipient, subject = %mail.subject, error = %e, "Failed to send mail");
            e.to_string()
        })
    }
}

fn missing_hints(titles: &[String]) -> String {
    titles
        .iter()
        .map(|t| format!("Missing attachment: {}", t))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Turn an attachment title into a safe basename.
///
/// Path separators, characters illegal on common filesystems and control
/// characters become `_`. A result that is empty or a `.`/`..` sentinel is
/// replaced with a fixed placeholder.
pub fn sanitize_file_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();

    match cleaned {
        "" | "." | ".." => PLACEHOLDER_FILE_NAME.to_string(),
        name => name.to_string(),
    }
}
