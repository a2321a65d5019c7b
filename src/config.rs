//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! oracle option has an explicit default, so a config file only needs to
//! name what it changes. Secrets (provider API keys, RPC endpoints) are
//! referenced by env-var name and resolved at runtime.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::time::Duration;

use crate::types::{AssetKey, OracleError, PriceMode, Tier};

// ---------------------------------------------------------------------------
// Well-known assets
// ---------------------------------------------------------------------------

pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub const USDT_MINT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";
pub const USDR_MINT: &str = "USDrbBQwQbQ2oWHUPfA8QBHcyVxKUq1xHyXXCmgS3FQ";
pub const USDCET_MINT: &str = "A9mUU4qviSctJVPJdBJWkb28deg915LYJKrzQ19ji3FM";

/// Pyth SOL/USD price feed id.
pub const SOL_USD_PYTH_FEED: &str =
    "0xef0d8b6fda2ceba41da15d4095d1da392a0d2f8ed0c6c7bc0f4cfac8c280b56d";

/// Prefix of staked base-asset positions, priced from the base asset.
pub const STAKED_SOL_PREFIX: &str = "STAKED_SOL_";

/// Token the upstream providers misprice; never fetched by default.
pub const SKIPPED_TOKEN_MINT: &str = "8UaGbxQbV9v2rXxWSSyHV6LR3p6bNH6PaUVWbUnMB9Za";

/// Upper bound for every `*_secs` option (ten years).
pub const MAX_CONFIG_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Configured seconds as a chrono span, clamped to [`MAX_CONFIG_SECS`].
pub(crate) fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_CONFIG_SECS) as i64)
}

// ---------------------------------------------------------------------------
// Application (binary) configuration
// ---------------------------------------------------------------------------

/// Top-level configuration for the `price-oracle` binary.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    /// Assets marked active at startup.
    #[serde(default)]
    pub watchlist: Vec<AssetKey>,
    /// How often the binary logs a stats summary.
    #[serde(default = "default_stats_log_interval_secs")]
    pub stats_log_interval_secs: u64,
}

fn default_stats_log_interval_secs() -> u64 {
    300
}

/// Env-var names and endpoints for the upstream adapters.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourcesConfig {
    pub birdeye_api_key_env: Option<String>,
    pub quicknode_rpc_env: Option<String>,
    pub jupiter_enabled: bool,
    pub pumpfun_enabled: bool,
    pub coingecko_enabled: bool,
    /// Asset key → CoinGecko coin id.
    pub coingecko_ids: HashMap<AssetKey, String>,
    pub pyth_enabled: bool,
    /// Asset key → Pyth price feed id (hex).
    pub pyth_feed_ids: HashMap<AssetKey, String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        let mut coingecko_ids = HashMap::new();
        coingecko_ids.insert(AssetKey::known(SOL_MINT), "solana".to_string());
        let mut pyth_feed_ids = HashMap::new();
        pyth_feed_ids.insert(AssetKey::known(SOL_MINT), SOL_USD_PYTH_FEED.to_string());
        Self {
            birdeye_api_key_env: Some("BIRDEYE_API_KEY".to_string()),
            quicknode_rpc_env: Some("QUICKNODE_RPC_ENDPOINT".to_string()),
            jupiter_enabled: true,
            pumpfun_enabled: true,
            coingecko_enabled: true,
            coingecko_ids,
            pyth_enabled: true,
            pyth_feed_ids,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8088,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config
            .oracle
            .validate()
            .with_context(|| format!("Invalid oracle configuration in {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

// ---------------------------------------------------------------------------
// Oracle configuration
// ---------------------------------------------------------------------------

/// Every recognised oracle option, with defaults.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OracleConfig {
    pub price_mode: PriceMode,
    pub tier_ttls: TierTtls,
    pub consensus_tolerance: Decimal,
    pub min_sources_for_consensus: usize,
    pub sanity_bounds: SanityBoundsConfig,
    /// Symbol → max accepted price age. The `default` entry covers the rest.
    pub max_cache_age_secs: HashMap<String, u64>,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_budget: RateBudgetConfig,
    pub failure_backoff: FailureBackoffConfig,
    pub batch: BatchConfig,
    pub assets: AssetsConfig,
    pub request_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    /// How long a consensus asset's last entry may be served when every
    /// source is down.
    pub last_known_max_age_secs: u64,
    /// Relaxed validation window after construction. 0 disables it.
    pub startup_grace_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        let mut max_cache_age_secs = HashMap::new();
        max_cache_age_secs.insert("SOL".to_string(), 60);
        max_cache_age_secs.insert(DEFAULT_AGE_KEY.to_string(), 60);
        Self {
            price_mode: PriceMode::default(),
            tier_ttls: TierTtls::default(),
            consensus_tolerance: dec!(0.15),
            min_sources_for_consensus: 2,
            sanity_bounds: SanityBoundsConfig::default(),
            max_cache_age_secs,
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_budget: RateBudgetConfig::default(),
            failure_backoff: FailureBackoffConfig::default(),
            batch: BatchConfig::default(),
            assets: AssetsConfig::default(),
            request_timeout_secs: 5,
            shutdown_timeout_secs: 5,
            last_known_max_age_secs: 1800,
            startup_grace_secs: 0,
        }
    }
}

/// Key of the fallback entry in `max_cache_age_secs`.
pub const DEFAULT_AGE_KEY: &str = "default";

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct TierTtls {
    pub active_secs: u64,
    pub recent_secs: u64,
    pub monitored_secs: u64,
    pub background_secs: u64,
}

impl Default for TierTtls {
    fn default() -> Self {
        Self {
            active_secs: 60,
            recent_secs: 300,
            monitored_secs: 1800,
            background_secs: 3600,
        }
    }
}

impl TierTtls {
    pub fn ttl(&self, tier: Tier) -> chrono::Duration {
        let secs = match tier {
            Tier::Active => self.active_secs,
            Tier::Recent => self.recent_secs,
            Tier::Monitored => self.monitored_secs,
            Tier::Background => self.background_secs,
        };
        seconds(secs)
    }
}

/// Inclusive hard price range.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct PriceBounds {
    pub min: Decimal,
    pub max: Decimal,
}

impl PriceBounds {
    pub fn new(min: Decimal, max: Decimal) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, price: Decimal) -> bool {
        self.min <= price && price <= self.max
    }
}

/// Per-class bounds plus per-asset overrides.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SanityBoundsConfig {
    pub base: PriceBounds,
    pub stable: PriceBounds,
    pub default: PriceBounds,
    pub overrides: HashMap<AssetKey, PriceBounds>,
}

impl Default for SanityBoundsConfig {
    fn default() -> Self {
        Self {
            base: PriceBounds::new(dec!(50), dec!(500)),
            stable: PriceBounds::new(dec!(0.95), dec!(1.05)),
            default: PriceBounds::new(dec!(0.0000001), dec!(100)),
            overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub failure_window_secs: u64,
    pub open_duration_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_window_secs: 30,
            open_duration_secs: 90,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct RateBudgetConfig {
    pub enabled: bool,
    pub daily_limit: u64,
    pub warn_threshold: u64,
    pub normal_interval_secs: u64,
    pub throttled_interval_secs: u64,
}

impl Default for RateBudgetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_limit: 100_000,
            warn_threshold: 90_000,
            normal_interval_secs: 300,
            throttled_interval_secs: 1200,
        }
    }
}

impl RateBudgetConfig {
    pub fn normal_interval(&self) -> Duration {
        Duration::from_secs(self.normal_interval_secs)
    }

    pub fn throttled_interval(&self) -> Duration {
        Duration::from_secs(self.throttled_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct FailureBackoffConfig {
    pub base_delay_secs: u64,
    pub max_retry_attempts: u32,
}

impl Default for FailureBackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 60,
            max_retry_attempts: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    /// Use provider-level bulk endpoints for multi-asset lookups.
    pub enabled: bool,
    pub provider_batch_size: usize,
    pub provider_batch_delay_ms: u64,
    pub per_asset_batch_size: usize,
    pub per_asset_pause_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider_batch_size: 50,
            provider_batch_delay_ms: 200,
            per_asset_batch_size: 10,
            per_asset_pause_ms: 100,
        }
    }
}

/// Asset classification used for tiering, bounds, and policy.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AssetsConfig {
    /// Native network asset. Never force-sold; always sampled for consensus.
    pub base_asset: AssetKey,
    /// Pegged assets, priced at `stable_price` without any fetch.
    pub stable_assets: HashSet<AssetKey>,
    pub stable_price: Decimal,
    /// Small set cached at the Monitored tier.
    pub well_known: HashSet<AssetKey>,
    /// Never fetched.
    pub excluded: HashSet<AssetKey>,
    /// Asset key → symbol, for per-symbol max cache age.
    pub symbols: HashMap<AssetKey, String>,
    /// Assets sampled from every available source (base asset implied).
    pub consensus_assets: HashSet<AssetKey>,
    /// Key prefix → underlying asset whose price it shares.
    pub derived_prefixes: HashMap<String, AssetKey>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        let sol = AssetKey::known(SOL_MINT);
        let usdc = AssetKey::known(USDC_MINT);
        let usdt = AssetKey::known(USDT_MINT);

        let stable_assets = [USDC_MINT, USDT_MINT, USDR_MINT, USDCET_MINT]
            .into_iter()
            .map(AssetKey::known)
            .collect();
        let well_known = [sol.clone(), usdc.clone(), usdt.clone()].into_iter().collect();

        let mut symbols = HashMap::new();
        symbols.insert(sol.clone(), "SOL".to_string());
        symbols.insert(usdc, "USDC".to_string());
        symbols.insert(usdt, "USDT".to_string());

        let mut derived_prefixes = HashMap::new();
        derived_prefixes.insert(STAKED_SOL_PREFIX.to_string(), sol.clone());

        Self {
            base_asset: sol,
            stable_assets,
            stable_price: Decimal::ONE,
            well_known,
            excluded: [AssetKey::known(SKIPPED_TOKEN_MINT)].into_iter().collect(),
            symbols,
            consensus_assets: HashSet::new(),
            derived_prefixes,
        }
    }
}

impl AssetsConfig {
    pub fn is_stable(&self, key: &AssetKey) -> bool {
        self.stable_assets.contains(key)
    }

    pub fn is_base(&self, key: &AssetKey) -> bool {
        &self.base_asset == key
    }

    pub fn is_excluded(&self, key: &AssetKey) -> bool {
        self.excluded.contains(key)
    }

    pub fn needs_consensus(&self, key: &AssetKey) -> bool {
        self.is_base(key) || self.consensus_assets.contains(key)
    }

    /// Underlying asset for a derived key (e.g. a staked position).
    pub fn underlying(&self, key: &AssetKey) -> Option<&AssetKey> {
        self.derived_prefixes
            .iter()
            .find(|(prefix, _)| key.as_str().starts_with(prefix.as_str()))
            .map(|(_, underlying)| underlying)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl OracleConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Reject configurations the oracle cannot run with.
    pub fn validate(&self) -> Result<(), OracleError> {
        let fail = |msg: String| Err(OracleError::Config(msg));

        let ttls = &self.tier_ttls;
        for (name, secs) in [
            ("active", ttls.active_secs),
            ("recent", ttls.recent_secs),
            ("monitored", ttls.monitored_secs),
            ("background", ttls.background_secs),
        ] {
            if secs == 0 {
                return fail(format!("tier_ttls.{name}_secs must be > 0"));
            }
        }

        if self.consensus_tolerance <= Decimal::ZERO || self.consensus_tolerance > Decimal::ONE {
            return fail(format!(
                "consensus_tolerance must be in (0, 1], got {}",
                self.consensus_tolerance
            ));
        }
        if self.min_sources_for_consensus < 2 {
            return fail("min_sources_for_consensus must be >= 2".to_string());
        }

        let bounds = &self.sanity_bounds;
        let named = [
            ("base".to_string(), bounds.base),
            ("stable".to_string(), bounds.stable),
            ("default".to_string(), bounds.default),
        ];
        let overrides = bounds
            .overrides
            .iter()
            .map(|(key, b)| (format!("overrides.{key}"), *b));
        for (name, b) in named.into_iter().chain(overrides) {
            if b.min < Decimal::ZERO || b.min >= b.max {
                return fail(format!(
                    "sanity_bounds.{name} must satisfy 0 <= min < max, got [{}, {}]",
                    b.min, b.max
                ));
            }
        }

        if !self.max_cache_age_secs.contains_key(DEFAULT_AGE_KEY) {
            return fail("max_cache_age_secs needs a \"default\" entry".to_string());
        }

        let age_limits = self
            .max_cache_age_secs
            .iter()
            .map(|(symbol, secs)| (format!("max_cache_age_secs.{symbol}"), *secs));
        let spans = [
            ("tier_ttls.active_secs".to_string(), ttls.active_secs),
            ("tier_ttls.recent_secs".to_string(), ttls.recent_secs),
            ("tier_ttls.monitored_secs".to_string(), ttls.monitored_secs),
            ("tier_ttls.background_secs".to_string(), ttls.background_secs),
            ("circuit_breaker.failure_window_secs".to_string(), self.circuit_breaker.failure_window_secs),
            ("circuit_breaker.open_duration_secs".to_string(), self.circuit_breaker.open_duration_secs),
            ("rate_budget.normal_interval_secs".to_string(), self.rate_budget.normal_interval_secs),
            ("rate_budget.throttled_interval_secs".to_string(), self.rate_budget.throttled_interval_secs),
            ("failure_backoff.base_delay_secs".to_string(), self.failure_backoff.base_delay_secs),
            ("request_timeout_secs".to_string(), self.request_timeout_secs),
            ("shutdown_timeout_secs".to_string(), self.shutdown_timeout_secs),
            ("last_known_max_age_secs".to_string(), self.last_known_max_age_secs),
            ("startup_grace_secs".to_string(), self.startup_grace_secs),
        ];
        for (name, secs) in spans.into_iter().chain(age_limits) {
            if secs > MAX_CONFIG_SECS {
                return fail(format!("{name} must be <= {MAX_CONFIG_SECS}, got {secs}"));
            }
        }

        let cb = &self.circuit_breaker;
        if cb.failure_threshold == 0 || cb.failure_window_secs == 0 || cb.open_duration_secs == 0 {
            return fail("circuit_breaker values must all be > 0".to_string());
        }

        let rb = &self.rate_budget;
        if rb.daily_limit == 0 {
            return fail("rate_budget.daily_limit must be > 0".to_string());
        }
        if rb.warn_threshold > rb.daily_limit {
            return fail(format!(
                "rate_budget.warn_threshold ({}) exceeds daily_limit ({})",
                rb.warn_threshold, rb.daily_limit
            ));
        }
        if rb.normal_interval_secs == 0 || rb.throttled_interval_secs == 0 {
            return fail("rate_budget intervals must be > 0".to_string());
        }

        if self.failure_backoff.base_delay_secs == 0 {
            return fail("failure_backoff.base_delay_secs must be > 0".to_string());
        }

        if self.batch.provider_batch_size == 0 || self.batch.per_asset_batch_size == 0 {
            return fail("batch sizes must be > 0".to_string());
        }

        if self.request_timeout_secs == 0 {
            return fail("request_timeout_secs must be > 0".to_string());
        }

        if self.assets.stable_price <= Decimal::ZERO {
            return fail("assets.stable_price must be positive".to_string());
        }
        if self.assets.derived_prefixes.keys().any(|p| p.is_empty()) {
            return fail("assets.derived_prefixes must not contain an empty prefix".to_string());
        }

        Ok(())
    }
}
