//! Wiring shared by the dispatcher binaries.

use std::sync::Arc;
use std::time::Duration;

use noticat_common::config::AppConfig;
use noticat_engine::clock::SystemClock;
use noticat_engine::delivery::DeliveryCascade;
use noticat_engine::executor::TaskExecutor;
use noticat_engine::scheduler::DispatchLimits;
use noticat_engine::store::NoticeStore;
use noticat_notifier::{ProcessMailSender, SmtpSettings};
use noticat_source::ProcessContentSource;

/// JSON logs, filtered by `RUST_LOG` or the given default directives.
pub fn init_tracing(default_directives: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directives.into()),
        )
        .json()
        .init();
}

/// Build an executor backed by the external catcher and mail sender.
pub fn build_executor(config: &AppConfig, store: Arc<dyn NoticeStore>) -> TaskExecutor {
    let source = Arc::new(ProcessContentSource::new(
        &config.catcher_interpreter,
        &config.catcher_script,
    ));
    let mailer = Arc::new(ProcessMailSender::new(
        &config.mail_bin,
        SmtpSettings {
            server: config.smtp_server.clone(),
            account: config.email_account.clone(),
            auth_code: config.email_auth_code.clone(),
            from: config.email_account.clone(),
        },
    ));
    let cascade = DeliveryCascade::new(source.clone(), mailer, &config.cache_dir)
        .with_max_attachment_mb(config.attachment_max_mb);

    TaskExecutor::new(store, source, cascade, Arc::new(SystemClock))
}

pub fn dispatch_limits(config: &AppConfig) -> DispatchLimits {
    DispatchLimits {
        max_concurrent: config.dispatch_max_concurrent,
        stagger: Duration::from_millis(config.dispatch_stagger_ms),
    }
}
