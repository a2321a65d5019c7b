//! Shared types for the price oracle.
//!
//! These types form the data model used across all modules: asset keys,
//! cache entries, samples, and the error/failure taxonomy. They carry no
//! behaviour beyond small helpers so that the cache, validation, and engine
//! modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Asset key
// ---------------------------------------------------------------------------

/// Opaque identifier of a tradable asset (usually a mint address).
///
/// Never empty. Construction trims surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetKey(String);

impl AssetKey {
    pub fn new(raw: impl Into<String>) -> Result<Self, OracleError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(OracleError::InvalidAssetKey(raw));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Key for a compile-time constant address. Must not be empty.
    pub(crate) fn known(address: &'static str) -> Self {
        debug_assert!(!address.is_empty());
        Self(address.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> String {
        if self.0.chars().count() <= 8 {
            self.0.clone()
        } else {
            let head: String = self.0.chars().take(8).collect();
            format!("{head}...")
        }
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AssetKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for AssetKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for AssetKey {
    type Err = OracleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for AssetKey {
    type Error = OracleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AssetKey> for String {
    fn from(key: AssetKey) -> Self {
        key.0
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Cache-freshness class of an asset. Each tier has its own TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Currently held or requested at high priority. Shortest TTL.
    Active,
    /// Recently touched by the trading layer.
    Recent,
    /// Small set of well-known assets.
    Monitored,
    /// Everything else. Longest TTL.
    Background,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Active => write!(f, "active"),
            Tier::Recent => write!(f, "recent"),
            Tier::Monitored => write!(f, "monitored"),
            Tier::Background => write!(f, "background"),
        }
    }
}

/// Caller-stated urgency of a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Immediate trading decision; cached at the Active tier.
    High,
    #[default]
    Normal,
}

/// The kind of collaborator asking for a price.
///
/// Only affects how a missing price is reported, never whether one is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerRole {
    /// Risk management; may exit positions it cannot price.
    Risk,
    /// Copy-trading; skips assets it cannot price.
    CopyBot,
    #[default]
    General,
}

impl fmt::Display for ConsumerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumerRole::Risk => write!(f, "risk"),
            ConsumerRole::CopyBot => write!(f, "copybot"),
            ConsumerRole::General => write!(f, "general"),
        }
    }
}

/// Upstream selection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceMode {
    /// Birdeye → QuickNode → Jupiter.
    #[default]
    Birdeye,
    /// QuickNode → Jupiter → Birdeye → Pump.fun.
    Jupiter,
}

impl fmt::Display for PriceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceMode::Birdeye => write!(f, "birdeye"),
            PriceMode::Jupiter => write!(f, "jupiter"),
        }
    }
}

// ---------------------------------------------------------------------------
// Prices
// ---------------------------------------------------------------------------

/// The single authoritative cached price for an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub price: Decimal,
    pub captured_at: DateTime<Utc>,
    /// Provider name, `"consensus"` for multi-sample medians, or `"peg"`.
    pub source: String,
    pub tier: Tier,
    pub fetch_duration_ms: u64,
}

impl PriceEntry {
    /// Age of the entry relative to `now`. Never negative.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.captured_at).max(chrono::Duration::zero())
    }
}

/// One price observation with provenance, gathered within a single lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub source: String,
    pub price: Decimal,
}

impl PriceSample {
    pub fn new(source: impl Into<String>, price: Decimal) -> Self {
        Self {
            source: source.into(),
            price,
        }
    }
}

/// Lookup outcome including force-sell guidance for the risk layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceResult {
    pub price: Option<Decimal>,
    pub success: bool,
    pub failure: Option<FetchFailure>,
    /// How long until the asset becomes eligible for another fetch.
    pub retry_after: Option<Duration>,
    pub force_sell_eligible: bool,
}

impl PriceResult {
    pub fn found(price: Decimal) -> Self {
        Self {
            price: Some(price),
            success: true,
            failure: None,
            retry_after: None,
            force_sell_eligible: false,
        }
    }

    pub fn missing(
        failure: FetchFailure,
        retry_after: Option<Duration>,
        force_sell_eligible: bool,
    ) -> Self {
        Self {
            price: None,
            success: false,
            failure: Some(failure),
            retry_after,
            force_sell_eligible,
        }
    }

    /// Human-readable failure reason, for logging.
    pub fn reason(&self) -> Option<String> {
        self.failure.as_ref().map(|f| f.to_string())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Programmer errors, fatal at construction time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid asset key: {0:?}")]
    InvalidAssetKey(String),
}

/// Failure of a single upstream call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error("{provider} timed out")]
    Timeout { provider: &'static str },

    #[error("{provider} returned HTTP {status}")]
    Http { provider: &'static str, status: u16 },

    #[error("{provider} returned an invalid response: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} has no price for {asset}")]
    NotFound { provider: &'static str, asset: String },

    #[error("{provider} is not configured")]
    NotConfigured { provider: &'static str },

    #[error("{provider} request failed: {message}")]
    Network {
        provider: &'static str,
        message: String,
    },
}

impl SourceError {
    /// Classify a transport error from `reqwest`.
    pub fn from_reqwest(provider: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout { provider }
        } else {
            SourceError::Network {
                provider,
                message: err.to_string(),
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SourceError::Timeout { .. })
    }
}

/// Why a lookup produced no price. A normal outcome, never a panic.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchFailure {
    #[error("source timed out: {provider}")]
    SourceTimeout { provider: String },

    #[error("circuit open for every remaining source (last: {provider})")]
    SourceUnavailable { provider: String },

    #[error("price {price} outside bounds [{min}, {max}]")]
    OutOfBounds {
        price: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("price is {age_secs}s old, max {max_age_secs}s")]
    StaleData { age_secs: u64, max_age_secs: u64 },

    #[error("consensus failed: deviation {deviation} above tolerance")]
    ConsensusFailed { deviation: Decimal },

    #[error("no source available")]
    NoSourceAvailable,

    #[error("call budget exhausted")]
    BudgetExhausted,

    #[error("backing off after repeated failures, retry in {retry_after_secs}s")]
    BackingOff { retry_after_secs: u64 },

    #[error("asset excluded from price fetching")]
    Excluded,

    #[error("suspicious price {price} without a second source")]
    SuspiciousPrice { price: Decimal },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_asset_key_rejects_empty() {
        assert!(AssetKey::new("").is_err());
        assert!(AssetKey::new("   ").is_err());
        assert_eq!(
            AssetKey::new(" So111 ").unwrap().as_str(),
            "So111",
        );
    }

    #[test]
    fn test_asset_key_short() {
        let key = AssetKey::new("So11111111111111111111111111111111111111112").unwrap();
        assert_eq!(key.short(), "So111111...");
        assert_eq!(AssetKey::new("ABC").unwrap().short(), "ABC");
    }

    #[test]
    fn test_asset_key_serde_roundtrip_rejects_empty() {
        let parsed: Result<AssetKey, _> = serde_json::from_str("\"\"");
        assert!(parsed.is_err());
        let parsed: AssetKey = serde_json::from_str("\"mint\"").unwrap();
        assert_eq!(parsed.as_str(), "mint");
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(Tier::Active.to_string(), "active");
        assert_eq!(Tier::Background.to_string(), "background");
    }

    #[test]
    fn test_entry_age_never_negative() {
        let now = Utc::now();
        let entry = PriceEntry {
            price: dec!(1),
            captured_at: now + chrono::Duration::seconds(5),
            source: "test".into(),
            tier: Tier::Active,
            fetch_duration_ms: 0,
        };
        assert_eq!(entry.age(now), chrono::Duration::zero());
    }

    #[test]
    fn test_price_result_reason() {
        let result = PriceResult::missing(FetchFailure::NoSourceAvailable, None, true);
        assert_eq!(result.reason().as_deref(), Some("no source available"));
        assert!(!result.success);
        assert!(PriceResult::found(dec!(2)).reason().is_none());
    }
}
