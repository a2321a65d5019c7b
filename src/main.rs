//! Price oracle service.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the source chain, keeps the watchlist warm through the
//! background refresher and serves stats until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use price_oracle::config;
use price_oracle::dashboard;
use price_oracle::engine::{CacheStats, PriceOracle};
use price_oracle::sources;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    info!(
        price_mode = ?cfg.oracle.price_mode,
        watchlist = cfg.watchlist.len(),
        daily_limit = cfg.oracle.rate_budget.daily_limit,
        "Price oracle starting up"
    );

    // -- Initialise components -------------------------------------------

    let chain = sources::build_chain(&cfg)?;
    if chain.is_empty() {
        warn!("No price source configured; only stable assets will resolve");
    } else {
        let names: Vec<_> = chain.iter().map(|s| s.name()).collect();
        info!(sources = ?names, "Source chain ready");
    }

    let oracle = Arc::new(
        PriceOracle::new(cfg.oracle.clone(), chain).context("Failed to construct oracle")?,
    );

    for asset in &cfg.watchlist {
        oracle.mark_active(asset);
    }
    oracle.start_background_refresh();

    if cfg.dashboard.enabled {
        if let Err(e) = dashboard::spawn_dashboard(Arc::clone(&oracle), cfg.dashboard.port).await {
            error!(error = %e, "Stats server disabled");
        }
    }

    // -- Main loop -------------------------------------------------------

    let mut interval =
        tokio::time::interval(Duration::from_secs(cfg.stats_log_interval_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        stats_interval_secs = cfg.stats_log_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => log_stats(&oracle.cache_stats()),
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    oracle.shutdown().await;
    log_stats(&oracle.cache_stats());
    info!("Price oracle shut down cleanly.");

    Ok(())
}

/// Log a one-line stats summary.
fn log_stats(stats: &CacheStats) {
    info!(
        hits = stats.cache_hits,
        misses = stats.cache_misses,
        hit_rate = format!("{:.1}%", stats.hit_rate * 100.0),
        api_calls = stats.api_calls,
        cache_size = stats.cache_size,
        active = stats.active_assets,
        avg_fetch_ms = format!("{:.0}", stats.avg_fetch_time_ms),
        failed = stats.failed_fetches_count,
        budget_used = format!("{:.1}%", stats.budget.percentage_used),
        throttled = stats.budget.throttle_active,
        "Oracle stats"
    );
    let degraded = stats.degraded_sources();
    if !degraded.is_empty() {
        warn!(sources = ?degraded, "Degraded price sources");
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("price_oracle=info"));

    let json_logging = std::env::var("PRICE_ORACLE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
