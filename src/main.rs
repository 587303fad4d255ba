//! Mastodon measures exporter.
//!
//! Polls the admin measures API of a Mastodon instance and republishes
//! the results as Prometheus gauges:
//! - counters (interactions, new users, reports): today and yesterday
//! - unique measures (active users): today, yesterday, last 7 and 30 days
//! - a freshness gauge that drops to 0 whenever a poll fails
//!
//! The scrape endpoint only opens after the first full poll, so nobody
//! ever scrapes the zeroes the gauges start with.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

mod api;
mod config;
mod error;
mod freshness;
mod measures;
mod metrics;
mod orchestrator;
mod poller;
mod server;

use api::mastodon::MastodonClient;
use config::{Config, LogFormat};
use freshness::FreshnessGate;
use measures::SystemClock;
use metrics::MetricsRegistry;
use orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(config.log_format);

    info!("🐘 Mastodon measures exporter v{}", env!("CARGO_PKG_VERSION"));

    // ── Remote ──────────────────────────────────────────────────────
    let client = MastodonClient::new(
        &config.base_url,
        &config.access_token,
        config.request_timeout,
    )
    .context("Failed to build HTTP client")?;

    let login = client
        .verify_credentials()
        .await
        .context("Failed to verify Mastodon credentials")?;
    info!(
        version = %login.version,
        app = %login.app_name,
        base_url = %client.base_url(),
        "Logged into Mastodon"
    );

    // ── Measures ────────────────────────────────────────────────────
    let metrics = MetricsRegistry::new(&config.metric_prefix);
    let mut orchestrator = Orchestrator::new(
        &measures::default_specs(),
        Arc::new(client),
        Arc::new(SystemClock),
        &metrics,
    )
    .context("Failed to register measures")?;
    let gate = FreshnessGate::new(&metrics, config.freshness_policy)
        .context("Failed to register freshness gauge")?;

    // Populate every gauge before anyone can scrape.
    poller::bootstrap(&mut orchestrator, &gate)
        .await
        .context("Initial measure fetch failed")?;

    // ── Scrape endpoint ─────────────────────────────────────────────
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    let server = tokio::spawn(server::serve(listener, metrics.clone()));

    info!(
        interval_secs = config.update_interval.as_secs(),
        policy = ?config.freshness_policy,
        fresh = gate.is_open(),
        "Exporter ready"
    );

    tokio::select! {
        _ = poller::run_poller(orchestrator, gate, config.update_interval) => {
            anyhow::bail!("poller stopped")
        }
        res = server => {
            match res {
                Ok(Ok(())) => error!("Metrics server stopped"),
                Ok(Err(e)) => error!(error = %e, "Metrics server failed"),
                Err(e) => error!(error = %e, "Metrics server task panicked"),
            }
            anyhow::bail!("metrics server exited")
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mastodon_exporter=info".into());

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}
