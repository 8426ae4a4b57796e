use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use worker_components::page::{uid_of, Page};
use worker_components::{QuickJsLoader, Worker, WorkerConfig};

/// How long the page waits for another worker message before it considers the
/// exchange settled.
const IDLE_TIMEOUT: Duration = Duration::from_millis(500);

fn main() -> Result<()> {
    let page_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("assets/index.html"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();

    let config_path = std::env::var("WORKER_COMPONENTS_CONFIG")
        .ok()
        .map(PathBuf::from);
    let config = WorkerConfig::load(config_path).unwrap_or_else(|err| {
        eprintln!("Failed to load worker configuration: {err}. Using defaults.");
        WorkerConfig::load(None).expect("default worker config")
    });

    let html = std::fs::read_to_string(&page_path)
        .with_context(|| format!("failed to read page {}", page_path.display()))?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let (port, worker) = Worker::spawn(QuickJsLoader, config.sources())?;
    let mut page = Page::new(&html, port).with_app(config.app());

    rt.block_on(async {
        page.initialize()?;
        settle(&mut page).await;

        let clickable = page
            .document()
            .descendants()
            .filter_map(|node| uid_of(&node))
            .next();
        if let Some(uid) = clickable {
            if page.dispatch_event(&uid, "click")? {
                settle(&mut page).await;
            }
        }
        anyhow::Ok(())
    })?;

    println!("{}", page.to_html());

    drop(page);
    worker.join()
}

/// Handle worker messages until none arrives within [`IDLE_TIMEOUT`].
async fn settle(page: &mut Page) {
    loop {
        match tokio::time::timeout(IDLE_TIMEOUT, page.next_message()).await {
            Ok(Ok(Some(kind))) => tracing::debug!(target: "page", kind = %kind, "handled"),
            Ok(Ok(None)) => {
                tracing::warn!(target: "page", "worker went away");
                return;
            }
            Ok(Err(err)) => tracing::error!(target: "page", error = %err, "failed to handle message"),
            Err(_) => return,
        }
    }
}
