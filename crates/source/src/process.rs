//! Content source backed by the catcher script.
//!
//! Every call spawns `<interpreter> <script> <client> <account> <password>
//! --action <action> ...` and reads one JSON document from stdout. Diagnostics
//! go to stderr and are surfaced in [`SourceError::Exit`].

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::process::Command;

use noticat_common::types::{Notice, NoticeDetail};

use crate::{ContentSource, DownloadRequest, FetchContext, SourceError};

/// Result document printed by the `download` action.
#[derive(Debug, Deserialize)]
struct DownloadReport {
    #[serde(default)]
    success: bool,
}

/// [`ContentSource`] that runs an external script per call.
#[derive(Debug, Clone)]
pub struct ProcessContentSource {
    interpreter: String,
    script: PathBuf,
}

impl ProcessContentSource {
    pub fn new(interpreter: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
        }
    }

    async fn run(&self, action: &'static str, args: Vec<String>) -> Result<Vec<u8>, SourceError> {
        let output = Command::new(&self.interpreter)
            .arg(&self.script)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::warn!(
                action,
                code = ?output.status.code(),
                stderr = %stderr,
                "Content source exited with failure"
            );
            return Err(SourceError::Exit {
                action,
                code: output.status.code(),
                stderr,
            });
        }

        Ok(output.stdout)
    }

    async fn run_json<T: DeserializeOwned>(
        &self,
        action: &'static str,
        args: Vec<String>,
    ) -> Result<T, SourceError> {
        let stdout = self.run(action, args).await?;
        serde_json::from_slice(&stdout).map_err(|source| {
            tracing::warn!(
                action,
                output = %String::from_utf8_lossy(&stdout),
                "Content source output is not valid JSON"
            );
            SourceError::Malformed { action, source }
        })
    }
}

/// Arguments shared by every action, in the order the script expects.
fn base_args(ctx: &FetchContext, action: &str) -> Vec<String> {
    vec![
        ctx.client.as_str().to_string(),
        ctx.account.clone(),
        ctx.password.clone(),
        "--action".to_string(),
        action.to_string(),
    ]
}

fn encode_options(ctx: &FetchContext) -> Result<String, SourceError> {
    serde_json::to_string(&ctx.options).map_err(SourceError::Options)
}

pub(crate) fn list_args(ctx: &FetchContext) -> Result<Vec<String>, SourceError> {
    let mut args = base_args(ctx, "list");
    args.extend(["--extra".to_string(), encode_options(ctx)?]);
    Ok(args)
}

pub(crate) fn detail_args(ctx: &FetchContext, url: &str) -> Result<Vec<String>, SourceError> {
    let mut args = base_args(ctx, "detail");
    args.extend([
        "--url".to_string(),
        url.to_string(),
        "--extra".to_string(),
        encode_options(ctx)?,
    ]);
    Ok(args)
}

pub(crate) fn download_args(
    ctx: &FetchContext,
    request: &DownloadRequest,
) -> Result<Vec<String>, SourceError> {
    let mut args = base_args(ctx, "download");
    args.extend([
        "--url".to_string(),
        request.url.clone(),
        "--save-path".to_string(),
        request.save_path.to_string_lossy().into_owned(),
        "--extra".to_string(),
        encode_options(ctx)?,
    ]);
    if request.max_size_mb > 0 {
        args.extend(["--max-size".to_string(), request.max_size_mb.to_string()]);
    }
    if !request.referer.is_empty() {
        args.extend(["--referer".to_string(), request.referer.clone()]);
    }
    Ok(args)
}

#[async_trait]
impl ContentSource for ProcessContentSource {
    async fn list(&self, ctx: &FetchContext) -> Result<Vec<Notice>, SourceError> {
        self.run_json("list", list_args(ctx)?).await
    }

    async fn detail(&self, ctx: &FetchContext, url: &str) -> Result<NoticeDetail, SourceError> {
        self.run_json("detail", detail_args(ctx, url)?).await
    }

    async fn download(
        &self,
        ctx: &FetchContext,
        request: &DownloadRequest,
    ) -> Result<(), SourceError> {
        let report: DownloadReport = self
            .run_json("download", download_args(ctx, request)?)
            .await?;
        if !report.success {
            return Err(SourceError::Rejected {
                url: request.url.clone(),
            });
        }
        Ok(())
    }
}
