//! Call-budget tracking and adaptive refresh interval.
//!
//! Counts upstream calls against a daily budget. Crossing the warning
//! threshold logs once per day; crossing the daily limit switches the
//! background refresh to the throttled interval until the next UTC day.
//! Foreground lookups are never blocked by the budget.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::RateBudgetConfig;

/// Process-wide call counters.
#[derive(Debug, Clone)]
struct RateBudget {
    daily_count: u64,
    hourly_count: u64,
    last_daily_reset: NaiveDate,
    /// Hours since the epoch at the last hourly reset.
    last_hourly_reset: i64,
    throttle_active: bool,
    warned: bool,
}

impl RateBudget {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            daily_count: 0,
            hourly_count: 0,
            last_daily_reset: now.date_naive(),
            last_hourly_reset: hour_bucket(now),
            throttle_active: false,
            warned: false,
        }
    }
}

fn hour_bucket(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(3600)
}

/// Budget status for stats.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    pub enabled: bool,
    pub daily_calls: u64,
    pub hourly_calls: u64,
    pub daily_limit: u64,
    pub percentage_used: f64,
    pub calls_remaining: u64,
    pub throttle_active: bool,
    pub current_interval_secs: u64,
    pub warn_threshold: u64,
    pub next_reset: Option<DateTime<Utc>>,
}

pub struct RateBudgetThrottler {
    config: RateBudgetConfig,
    state: Mutex<RateBudget>,
}

impl RateBudgetThrottler {
    pub fn new(config: RateBudgetConfig) -> Self {
        Self::new_at(config, Utc::now())
    }

    pub fn new_at(config: RateBudgetConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            state: Mutex::new(RateBudget::new(now)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RateBudget> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Reset counters that crossed a day or hour boundary.
    fn roll_over(&self, budget: &mut RateBudget, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today > budget.last_daily_reset {
            info!(
                yesterday_calls = budget.daily_count,
                "UTC day rollover, daily call budget reset"
            );
            budget.daily_count = 0;
            budget.last_daily_reset = today;
            budget.warned = false;
            if budget.throttle_active {
                info!(
                    interval_secs = self.config.normal_interval_secs,
                    "Call-budget throttle deactivated"
                );
                budget.throttle_active = false;
            }
        }

        let hour = hour_bucket(now);
        if hour != budget.last_hourly_reset {
            budget.hourly_count = 0;
            budget.last_hourly_reset = hour;
        }
    }

    pub fn record_call(&self) {
        self.record_call_at(Utc::now());
    }

    /// Count one upstream call at `now`.
    pub fn record_call_at(&self, now: DateTime<Utc>) {
        self.record_calls_at(1, now);
    }

    /// Count `n` upstream calls at `now` (bulk endpoints bill per asset).
    pub fn record_calls_at(&self, n: u64, now: DateTime<Utc>) {
        if !self.config.enabled || n == 0 {
            return;
        }
        let mut budget = self.lock();
        self.roll_over(&mut budget, now);

        budget.daily_count += n;
        budget.hourly_count += n;

        if !budget.warned && budget.daily_count >= self.config.warn_threshold {
            budget.warned = true;
            warn!(
                daily_calls = budget.daily_count,
                daily_limit = self.config.daily_limit,
                remaining = self.config.daily_limit.saturating_sub(budget.daily_count),
                "Call budget warning threshold reached"
            );
        }

        if !budget.throttle_active && budget.daily_count >= self.config.daily_limit {
            budget.throttle_active = true;
            error!(
                daily_calls = budget.daily_count,
                interval_secs = self.config.throttled_interval_secs,
                "Call budget exhausted, background refresh throttled until UTC midnight"
            );
        }
    }

    pub fn is_throttled_at(&self, now: DateTime<Utc>) -> bool {
        if !self.config.enabled {
            return false;
        }
        let mut budget = self.lock();
        self.roll_over(&mut budget, now);
        budget.throttle_active
    }

    /// Interval the background refresher should sleep for.
    pub fn current_interval(&self) -> Duration {
        self.current_interval_at(Utc::now())
    }

    pub fn current_interval_at(&self, now: DateTime<Utc>) -> Duration {
        if self.is_throttled_at(now) {
            self.config.throttled_interval()
        } else {
            self.config.normal_interval()
        }
    }

    pub fn status(&self) -> BudgetStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> BudgetStatus {
        if !self.config.enabled {
            return BudgetStatus {
                enabled: false,
                daily_calls: 0,
                hourly_calls: 0,
                daily_limit: self.config.daily_limit,
                percentage_used: 0.0,
                calls_remaining: self.config.daily_limit,
                throttle_active: false,
                current_interval_secs: self.config.normal_interval_secs,
                warn_threshold: self.config.warn_threshold,
                next_reset: None,
            };
        }

        let mut budget = self.lock();
        self.roll_over(&mut budget, now);
        let percentage_used = budget.daily_count as f64 / self.config.daily_limit as f64 * 100.0;
        let current_interval_secs = if budget.throttle_active {
            self.config.throttled_interval_secs
        } else {
            self.config.normal_interval_secs
        };
        let next_reset = budget
            .last_daily_reset
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc());

        BudgetStatus {
            enabled: true,
            daily_calls: budget.daily_count,
            hourly_calls: budget.hourly_count,
            daily_limit: self.config.daily_limit,
            percentage_used: (percentage_used * 100.0).round() / 100.0,
            calls_remaining: self.config.daily_limit.saturating_sub(budget.daily_count),
            throttle_active: budget.throttle_active,
            current_interval_secs,
            warn_threshold: self.config.warn_threshold,
            next_reset,
        }
    }
}
