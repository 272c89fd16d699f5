//! Mail delivery.
//!
//! The engine hands finished notifications to a [`MailSender`]. The production
//! implementation, [`ProcessMailSender`], delegates the SMTP and MIME work to an
//! external sender binary, one process per message.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// Errors raised while handing a message to the mail sender.
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("failed to launch mail sender: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("mail sender exited with code {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },
}

/// A message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Local files attached to the message.
    pub attachments: Vec<PathBuf>,
}

/// Account the sender authenticates with.
#[derive(Clone)]
pub struct SmtpSettings {
    /// Server identifier understood by the sender binary (e.g. "163").
    pub server: String,
    pub account: String,
    pub auth_code: String,
    pub from: String,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("server", &self.server)
            .field("account", &self.account)
            .field("auth_code", &"<redacted>")
            .field("from", &self.from)
            .finish()
    }
}

/// Delivers one email per call.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotifierError>;
}

/// [`MailSender`] that runs the external sender binary.
#[derive(Debug, Clone)]
pub struct ProcessMailSender {
    binary: PathBuf,
    smtp: SmtpSettings,
}

impl ProcessMailSender {
    pub fn new(binary: impl Into<PathBuf>, smtp: SmtpSettings) -> Self {
        Self {
            binary: binary.into(),
            smtp,
        }
    }

    /// Command-line arguments for one message. The body goes last as the only
    /// positional argument.
    fn args(&self, mail: &OutgoingMail) -> Vec<String> {
        let mut args = vec![
            "--smtp-server".to_string(),
            self.smtp.server.clone(),
            "--user-account".to_string(),
            self.smtp.account.clone(),
            "--auth-code".to_string(),
            self.smtp.auth_code.clone(),
            "--from".to_string(),
            self.smtp.from.clone(),
            "--to".to_string(),
            mail.to.clone(),
            "--subject".to_string(),
            mail.subject.clone(),
        ];
        for path in &mail.attachments {
            args.push("--attachment".to_string());
            args.push(path.to_string_lossy().into_owned());
        }
        // Body may start with '-'; end option parsing first
        args.push("--".to_string());
        args.push(mail.body.clone());
        args
    }
}

#[async_trait]
impl MailSender for ProcessMailSender {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotifierError> {
        let output = Command::new(&self.binary)
            .args(self.args(mail))
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(NotifierError::Exit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        tracing::debug!(
            to = %mail.to,
            attachments = mail.attachments.len(),
            "Mail handed to sender"
        );
        Ok(())
    }
}
