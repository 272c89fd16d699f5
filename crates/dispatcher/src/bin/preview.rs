//! Fetch one task on demand and print its newest notice.
//!
//! ```bash
//! cargo run -p noticat-dispatcher --bin preview -- <task-id> [recipient@example.com]
//! ```
//!
//! With a recipient, the notice title is also mailed there as a test message.
//! The delivery ledger is not touched.

use std::sync::Arc;

use uuid::Uuid;

use noticat_common::config::AppConfig;
use noticat_common::db;
use noticat_dispatcher::{build_executor, init_tracing};
use noticat_engine::store::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("preview=info,noticat_engine=info");

    let mut args = std::env::args().skip(1);
    let task_id: Uuid = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: preview <task-id> [recipient]"))?
        .parse()?;
    let recipient = args.next();

    let config = AppConfig::from_env()?;
    let pool = db::create_pool(&config.database_url, 2).await?;
    let store = Arc::new(PgStore::new(pool));

    let task = store.get_task(task_id).await?;
    let executor = build_executor(&config, store);

    match executor.test_fetch(&task, recipient.as_deref()).await? {
        Some(notice) => println!("{}", serde_json::to_string_pretty(&notice)?),
        None => println!("null"),
    }

    Ok(())
}
