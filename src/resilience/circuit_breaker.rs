//! Per-source circuit breaker.
//!
//! States: **Closed** (normal) → **Open** (blocked) → **HalfOpen** (one
//! trial at a time) → Closed. Failures only accumulate while they arrive
//! within `failure_window` of each other, in Closed and HalfOpen alike, and
//! the circuit opens when the count reaches the threshold. A success walks
//! the count back down by one instead of clearing it, so a flapping
//! provider stays near the threshold.
//!
//! State is in-memory and resets on restart.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::{self, CircuitBreakerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Health record of a single source.
#[derive(Debug, Clone)]
struct SourceHealth {
    state: CircuitState,
    failure_count: u32,
    window_start: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    /// Start of the HalfOpen trial currently in flight.
    trial_started: Option<DateTime<Utc>>,
}

impl SourceHealth {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            window_start: None,
            last_failure: None,
            opened_at: None,
            trial_started: None,
        }
    }
}

/// Snapshot of one source's circuit, for stats.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub source: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub window_start: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    failure_window: Duration,
    open_duration: Duration,
    sources: Mutex<HashMap<String, SourceHealth>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            failure_window: config::seconds(config.failure_window_secs),
            open_duration: config::seconds(config.open_duration_secs),
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Lock the health table, recovering from poison.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, SourceHealth>> {
        self.sources.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn is_open(&self, source: &str) -> bool {
        self.is_open_at(source, Utc::now())
    }

    /// Whether `source` is blocked at `now`.
    ///
    /// Moves Open → HalfOpen once `open_duration` has fully elapsed. While
    /// HalfOpen, only the caller that claims the trial sees the circuit
    /// closed; a trial with no recorded outcome after `failure_window` is
    /// considered lost and the next caller takes over.
    pub fn is_open_at(&self, source: &str, now: DateTime<Utc>) -> bool {
        let mut sources = self.lock();
        let Some(health) = sources.get_mut(source) else {
            return false;
        };

        match health.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let opened_at = health.opened_at.unwrap_or(now);
                if now - opened_at <= self.open_duration {
                    return true;
                }
                info!(source, "Circuit half-open, allowing a trial");
                health.state = CircuitState::HalfOpen;
                health.failure_count = 0;
                health.window_start = None;
                health.last_failure = None;
                health.trial_started = Some(now);
                false
            }
            CircuitState::HalfOpen => {
                let in_flight = health
                    .trial_started
                    .is_some_and(|started| now - started <= self.failure_window);
                if in_flight {
                    return true;
                }
                health.trial_started = Some(now);
                false
            }
        }
    }

    pub fn record_failure(&self, source: &str) {
        self.record_failure_at(source, Utc::now());
    }

    pub fn record_failure_at(&self, source: &str, now: DateTime<Utc>) {
        let mut sources = self.lock();
        let health = sources
            .entry(source.to_string())
            .or_insert_with(SourceHealth::new);

        match health.state {
            CircuitState::Open => {
                health.last_failure = Some(now);
            }
            CircuitState::Closed | CircuitState::HalfOpen => {
                health.trial_started = None;
                let within_window = health
                    .last_failure
                    .is_some_and(|last| now - last <= self.failure_window);
                if within_window {
                    health.failure_count += 1;
                } else {
                    health.failure_count = 1;
                    health.window_start = Some(now);
                }
                health.last_failure = Some(now);

                if health.failure_count >= self.failure_threshold {
                    warn!(
                        source,
                        failures = health.failure_count,
                        open_secs = self.open_duration.num_seconds(),
                        "Circuit OPENED"
                    );
                    health.state = CircuitState::Open;
                    health.opened_at = Some(now);
                } else {
                    debug!(
                        source,
                        failures = health.failure_count,
                        threshold = self.failure_threshold,
                        "Source failure recorded"
                    );
                }
            }
        }
    }

    pub fn record_success(&self, source: &str) {
        let mut sources = self.lock();
        let Some(health) = sources.get_mut(source) else {
            return;
        };
        health.failure_count = health.failure_count.saturating_sub(1);
        if health.state == CircuitState::HalfOpen {
            info!(source, "Probe succeeded, circuit closed");
            health.state = CircuitState::Closed;
            health.opened_at = None;
            health.trial_started = None;
        }
    }

    pub fn state(&self, source: &str) -> CircuitState {
        self.lock()
            .get(source)
            .map(|h| h.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn failure_count(&self, source: &str) -> u32 {
        self.lock().get(source).map(|h| h.failure_count).unwrap_or(0)
    }

    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<CircuitSnapshot> = self
            .lock()
            .iter()
            .map(|(source, h)| CircuitSnapshot {
                source: source.clone(),
                state: h.state,
                failure_count: h.failure_count,
                window_start: h.window_start,
                opened_at: h.opened_at,
            })
            .collect();
        snapshots.sort_by(|a, b| a.source.cmp(&b.source));
        snapshots
    }
}
