//! Lookup counters and the stats snapshot exposed to dashboards.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::resilience::{BudgetStatus, CircuitSnapshot};
use crate::types::PriceMode;

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Lock-free counters updated on every lookup.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    api_calls: AtomicU64,
    fetches: AtomicU64,
    fetch_ms_total: AtomicU64,
}

impl Counters {
    pub fn hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn api_call(&self) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the wall time of one successful fetch.
    pub fn fetch_completed(&self, duration_ms: u64) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.fetch_ms_total.fetch_add(duration_ms, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn api_calls(&self) -> u64 {
        self.api_calls.load(Ordering::Relaxed)
    }

    pub fn avg_fetch_time_ms(&self) -> f64 {
        let n = self.fetches.load(Ordering::Relaxed);
        if n == 0 {
            return 0.0;
        }
        self.fetch_ms_total.load(Ordering::Relaxed) as f64 / n as f64
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of the oracle for observability.
///
/// Lets an operator tell "one provider is down" (an open circuit) from
/// "every provider is down" (all circuits open, failure count rising).
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub api_calls: u64,
    pub cache_size: usize,
    pub active_assets: usize,
    pub recent_assets: usize,
    pub avg_fetch_time_ms: f64,
    pub hit_rate: f64,
    pub price_mode: PriceMode,
    /// Assets currently tracked by the failure backoff.
    pub failed_fetches_count: usize,
    pub circuits: Vec<CircuitSnapshot>,
    pub budget: BudgetStatus,
}

impl CacheStats {
    /// Sources whose circuit is not closed.
    pub fn degraded_sources(&self) -> Vec<&str> {
        self.circuits
            .iter()
            .filter(|c| c.state != crate::resilience::CircuitState::Closed)
            .map(|c| c.source.as_str())
            .collect()
    }
}
