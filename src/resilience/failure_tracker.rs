//! Per-asset exponential backoff.
//!
//! An asset that keeps failing is skipped for
//! `base_delay * 2^(failures - max_retry_attempts)` once its consecutive
//! failures exceed `max_retry_attempts`. Below that, retries are immediate.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::config::{self, FailureBackoffConfig};
use crate::types::AssetKey;

/// Largest exponent applied to the base delay.
const MAX_BACKOFF_EXPONENT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FailureRecord {
    last_failure_at: DateTime<Utc>,
    consecutive_failures: u32,
}

pub struct FailureTracker {
    base_delay: Duration,
    max_retry_attempts: u32,
    records: Mutex<HashMap<AssetKey, FailureRecord>>,
}

impl FailureTracker {
    pub fn new(config: FailureBackoffConfig) -> Self {
        Self {
            base_delay: config::seconds(config.base_delay_secs),
            max_retry_attempts: config.max_retry_attempts,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AssetKey, FailureRecord>> {
        self.records.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Backoff window for a failure count, `None` while retries are free.
    pub fn backoff_for(&self, consecutive_failures: u32) -> Option<Duration> {
        if consecutive_failures <= self.max_retry_attempts {
            return None;
        }
        let exponent = (consecutive_failures - self.max_retry_attempts).min(MAX_BACKOFF_EXPONENT);
        Some(self.base_delay * 2_i32.pow(exponent))
    }

    pub fn should_skip_at(&self, key: &AssetKey, now: DateTime<Utc>) -> bool {
        self.retry_after_at(key, now).is_some()
    }

    /// Time left before `key` may be fetched again, if it is backing off.
    pub fn retry_after_at(&self, key: &AssetKey, now: DateTime<Utc>) -> Option<std::time::Duration> {
        let record = *self.lock().get(key)?;
        let backoff = self.backoff_for(record.consecutive_failures)?;
        let elapsed = now - record.last_failure_at;
        if elapsed < backoff {
            (backoff - elapsed).to_std().ok()
        } else {
            None
        }
    }

    pub fn record_failure(&self, key: &AssetKey) -> u32 {
        self.record_failure_at(key, Utc::now())
    }

    /// Record a failure and return the new consecutive count.
    ///
    /// A failure more than `2 * base_delay` after the previous one starts a
    /// fresh episode.
    pub fn record_failure_at(&self, key: &AssetKey, now: DateTime<Utc>) -> u32 {
        let mut records = self.lock();
        let count = match records.get(key) {
            Some(prev) if now - prev.last_failure_at <= self.base_delay * 2 => {
                prev.consecutive_failures + 1
            }
            _ => 1,
        };
        records.insert(
            key.clone(),
            FailureRecord {
                last_failure_at: now,
                consecutive_failures: count,
            },
        );
        debug!(asset = %key.short(), count, "Recorded price fetch failure");
        count
    }

    pub fn clear(&self, key: &AssetKey) {
        if self.lock().remove(key).is_some() {
            debug!(asset = %key.short(), "Cleared failure tracking");
        }
    }

    /// Number of assets with an outstanding failure record.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
