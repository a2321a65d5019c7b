//! Accept/reject decision for freshly sampled prices.
//!
//! Checks run in order and short-circuit on the first failure:
//! sanity bounds, age limit, cross-source deviation. Pegged assets skip
//! every check and validate at the configured peg price.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

use super::bounds::SanityBoundsTable;
use crate::config::{self, OracleConfig, DEFAULT_AGE_KEY};
use crate::types::{AssetKey, FetchFailure, PriceSample};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationReason {
    Passed,
    /// Pegged asset; the price is the configured constant.
    StablePeg,
    /// Relaxed acceptance during the startup grace window.
    StartupGrace,
    OutOfBounds { min: Decimal, max: Decimal },
    StaleData { age_secs: u64, max_age_secs: u64 },
    ConsensusFailed { deviation: Decimal },
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::StablePeg => write!(f, "stable_peg"),
            Self::StartupGrace => write!(f, "startup_grace"),
            Self::OutOfBounds { min, max } => write!(f, "out_of_bounds_{min}_{max}"),
            Self::StaleData { age_secs, .. } => write!(f, "stale_data_{age_secs}s"),
            Self::ConsensusFailed { deviation } => {
                write!(f, "consensus_failed_{:.2}%", deviation * Decimal::ONE_HUNDRED)
            }
        }
    }
}

/// Outcome of [`ConsensusValidator::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub ok: bool,
    pub reason: ValidationReason,
    /// The validated price (the peg price for stable assets).
    pub price: Decimal,
    pub sources_used: Vec<String>,
    pub deviation: Option<Decimal>,
}

impl Validation {
    /// The failure to report to callers, if rejected.
    pub fn failure(&self) -> Option<FetchFailure> {
        match &self.reason {
            ValidationReason::OutOfBounds { min, max } => Some(FetchFailure::OutOfBounds {
                price: self.price,
                min: *min,
                max: *max,
            }),
            ValidationReason::StaleData {
                age_secs,
                max_age_secs,
            } => Some(FetchFailure::StaleData {
                age_secs: *age_secs,
                max_age_secs: *max_age_secs,
            }),
            ValidationReason::ConsensusFailed { deviation } => Some(FetchFailure::ConsensusFailed {
                deviation: *deviation,
            }),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Relative spread `(max - min) / max` of the sampled prices.
pub fn deviation(samples: &[PriceSample]) -> Option<Decimal> {
    let max = samples.iter().map(|s| s.price).max()?;
    let min = samples.iter().map(|s| s.price).min()?;
    if max <= Decimal::ZERO {
        return Some(Decimal::ZERO);
    }
    Some((max - min) / max)
}

/// Upper median of the sampled prices.
pub fn median_price(samples: &[PriceSample]) -> Option<Decimal> {
    let mut prices: Vec<Decimal> = samples.iter().map(|s| s.price).collect();
    if prices.is_empty() {
        return None;
    }
    prices.sort();
    Some(prices[prices.len() / 2])
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

pub struct ConsensusValidator {
    bounds: SanityBoundsTable,
    tolerance: Decimal,
    min_sources: usize,
    max_age_secs: HashMap<String, u64>,
    symbols: HashMap<AssetKey, String>,
    stable_assets: HashSet<AssetKey>,
    stable_price: Decimal,
    grace_until: Option<DateTime<Utc>>,
}

impl ConsensusValidator {
    /// Build from config. The startup grace window (if any) starts at `started_at`.
    pub fn from_config(config: &OracleConfig, started_at: DateTime<Utc>) -> Self {
        let grace_until = (config.startup_grace_secs > 0)
            .then(|| started_at + config::seconds(config.startup_grace_secs));
        Self {
            bounds: SanityBoundsTable::new(config.sanity_bounds.clone(), &config.assets),
            tolerance: config.consensus_tolerance,
            min_sources: config.min_sources_for_consensus,
            max_age_secs: config.max_cache_age_secs.clone(),
            symbols: config.assets.symbols.clone(),
            stable_assets: config.assets.stable_assets.clone(),
            stable_price: config.assets.stable_price,
            grace_until,
        }
    }

    /// Max accepted age for an asset, by its symbol.
    pub fn max_age_secs(&self, key: &AssetKey) -> u64 {
        self.symbols
            .get(key)
            .and_then(|symbol| self.max_age_secs.get(symbol))
            .or_else(|| self.max_age_secs.get(DEFAULT_AGE_KEY))
            .copied()
            .unwrap_or(60)
    }

    pub fn validate(
        &self,
        key: &AssetKey,
        price: Decimal,
        samples: &[PriceSample],
        cache_age_secs: Option<u64>,
    ) -> Validation {
        self.validate_at(key, price, samples, cache_age_secs, Utc::now())
    }

    pub fn validate_at(
        &self,
        key: &AssetKey,
        price: Decimal,
        samples: &[PriceSample],
        cache_age_secs: Option<u64>,
        now: DateTime<Utc>,
    ) -> Validation {
        let sources_used: Vec<String> = samples.iter().map(|s| s.source.clone()).collect();
        let verdict = |ok: bool, reason: ValidationReason, deviation: Option<Decimal>| Validation {
            ok,
            reason,
            price,
            sources_used: sources_used.clone(),
            deviation,
        };

        if self.stable_assets.contains(key) {
            return Validation {
                ok: true,
                reason: ValidationReason::StablePeg,
                price: self.stable_price,
                sources_used: Vec::new(),
                deviation: None,
            };
        }

        if let Some(until) = self.grace_until {
            if now < until && price > Decimal::ZERO {
                info!(asset = %key.short(), %price, "Startup grace active, relaxed validation");
                return verdict(true, ValidationReason::StartupGrace, None);
            }
        }

        // 1. Bounds
        let bounds = self.bounds.bounds_for(key);
        if !bounds.contains(price) {
            warn!(
                asset = %key.short(),
                %price,
                min = %bounds.min,
                max = %bounds.max,
                "Price outside sanity bounds"
            );
            return verdict(
                false,
                ValidationReason::OutOfBounds {
                    min: bounds.min,
                    max: bounds.max,
                },
                None,
            );
        }

        // 2. Age
        let max_age_secs = self.max_age_secs(key);
        if let Some(age_secs) = cache_age_secs {
            if age_secs > max_age_secs {
                debug!(asset = %key.short(), age_secs, max_age_secs, "Price too old");
                return verdict(
                    false,
                    ValidationReason::StaleData {
                        age_secs,
                        max_age_secs,
                    },
                    None,
                );
            }
        }

        // 3. Consensus
        if samples.len() >= self.min_sources {
            if let Some(dev) = deviation(samples) {
                if dev > self.tolerance {
                    warn!(
                        asset = %key.short(),
                        deviation = %dev,
                        tolerance = %self.tolerance,
                        sources = ?samples.iter().map(|s| (&s.source, s.price)).collect::<Vec<_>>(),
                        "Consensus check failed"
                    );
                    return verdict(false, ValidationReason::ConsensusFailed { deviation: dev }, Some(dev));
                }
                return verdict(true, ValidationReason::Passed, Some(dev));
            }
        }

        verdict(true, ValidationReason::Passed, None)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
