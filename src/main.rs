//! Feed Herald binary entrypoint.
//! Loads config, opens the state store, starts the delivery worker and arms
//! the poll triggers. Runs until SIGTERM/SIGINT.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feed_herald::ingest::config::load_config_default;
use feed_herald::ingest::scheduler::Scheduler;
use feed_herald::metrics::Metrics;
use feed_herald::notify::{ChannelSink, NotificationSink, NotifierMux};
use feed_herald::poller::{ContentCycle, FeedCycle, Poller, PollerOptions};
use feed_herald::store::{ItemStateStore, JsonFileStore};

const DELIVERY_QUEUE: usize = 64;

/// Compact logs by default; `LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_JSON").is_ok_and(|v| v == "1");

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            _ => {
                tracing::warn!("signal handlers unavailable; falling back to ctrl_c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = load_config_default().context("loading configuration")?;
    tracing::info!(
        video_sources = cfg.video_sources.len(),
        feed_sources = cfg.feed_sources.len(),
        state = %cfg.store.path.display(),
        "configuration loaded"
    );

    let metrics = Metrics::init()?;
    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding metrics listener on {addr}"))?;
        let router = metrics.router();
        tracing::info!(%addr, "metrics endpoint listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "metrics server stopped");
            }
        });
    }

    let store: Arc<dyn ItemStateStore> = Arc::new(
        JsonFileStore::open(&cfg.store.path)
            .await
            .context("opening state store")?,
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .user_agent(concat!("feed-herald/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building http client")?;

    let mux = NotifierMux::new(client.clone());
    let (sink, worker) = ChannelSink::spawn(Arc::new(mux), DELIVERY_QUEUE);
    let sink: Arc<dyn NotificationSink> = Arc::new(sink);

    let cancel = CancellationToken::new();
    let poller = Arc::new(
        Poller::new(store, sink)
            .with_options(PollerOptions {
                fail_open_on_read_error: cfg.store.fail_open_on_read_error,
            })
            .with_cancel(cancel.clone()),
    );

    let mut scheduler = Scheduler::new(cancel.clone());
    let sources = cfg.watched_sources(&client);
    if !sources.is_empty() {
        let job = ContentCycle {
            poller: poller.clone(),
            sources,
        };
        scheduler.schedule(cfg.content_trigger()?, Arc::new(job)).await?;
    }
    let feeds = cfg.watched_feeds(&client);
    if !feeds.is_empty() {
        let job = FeedCycle {
            poller: poller.clone(),
            feeds,
        };
        scheduler.schedule(cfg.feed_trigger()?, Arc::new(job)).await?;
    }

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown requested");

    scheduler.shutdown().await;
    // The worker ends once the last sink clone (held via the poller) is gone.
    drop(poller);
    match tokio::time::timeout(Duration::from_secs(10), worker).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "delivery worker ended abnormally"),
        Err(_) => tracing::warn!("delivery worker still busy; exiting anyway"),
    }
    tracing::info!("bye");
    Ok(())
}
