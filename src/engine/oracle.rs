//! The price oracle: public lookup API over cache, sources and validation.
//!
//! A lookup goes cache → failure backoff → source chain (filtered by
//! circuit state) → validation → cache write. Every "no price" outcome is a
//! [`FetchFailure`] handled here and surfaced to callers as `None`, never
//! as an error. One background task keeps the active set warm.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::refresher::{self, RefresherHandle};
use super::stats::{CacheStats, Counters};
use crate::cache::{Membership, TieredCache};
use crate::config::{self, OracleConfig};
use crate::resilience::{CircuitBreaker, FailureTracker, RateBudgetThrottler};
use crate::sources::SourceAdapter;
use crate::types::{
    AssetKey, ConsumerRole, FetchFailure, OracleError, PriceResult, PriceSample, Priority,
};
use crate::validation::consensus::median_price;
use crate::validation::ConsensusValidator;

/// Provenance recorded for prices accepted from more than one sample.
const CONSENSUS_SOURCE: &str = "consensus";

type Outcome = Result<Decimal, FetchFailure>;

pub struct PriceOracle {
    config: OracleConfig,
    sources: Vec<Arc<dyn SourceAdapter>>,
    membership: Arc<Membership>,
    cache: TieredCache,
    validator: ConsensusValidator,
    breaker: CircuitBreaker,
    throttler: RateBudgetThrottler,
    failures: FailureTracker,
    counters: Counters,
    refresher: Mutex<Option<RefresherHandle>>,
}

impl PriceOracle {
    /// Build an oracle over an ordered source chain.
    ///
    /// Fails only on invalid configuration.
    pub fn new(
        config: OracleConfig,
        sources: Vec<Arc<dyn SourceAdapter>>,
    ) -> Result<Self, OracleError> {
        config.validate()?;

        let membership = Arc::new(Membership::new(config.assets.well_known.clone()));
        let oracle = Self {
            cache: TieredCache::new(config.tier_ttls, Arc::clone(&membership)),
            validator: ConsensusValidator::from_config(&config, Utc::now()),
            breaker: CircuitBreaker::new(config.circuit_breaker),
            throttler: RateBudgetThrottler::new(config.rate_budget),
            failures: FailureTracker::new(config.failure_backoff),
            counters: Counters::default(),
            refresher: Mutex::new(None),
            membership,
            sources,
            config,
        };

        info!(
            mode = %oracle.config.price_mode,
            sources = ?oracle.sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
            budget_enabled = oracle.throttler.is_enabled(),
            "Price oracle initialised"
        );
        Ok(oracle)
    }

    // -- Lookups ---------------------------------------------------------

    /// Price of `key`, cache-first unless `force_fetch`.
    ///
    /// `None` when no trustworthy price could be obtained; the reason is
    /// logged according to `role`.
    pub async fn get_price(
        &self,
        key: &AssetKey,
        force_fetch: bool,
        priority: Priority,
        role: ConsumerRole,
    ) -> Option<Decimal> {
        match self.lookup(key, force_fetch, priority).await {
            Ok(price) => Some(price),
            Err(failure) => {
                self.report_failure(key, role, &failure);
                None
            }
        }
    }

    /// Prices for many assets.
    ///
    /// Cache hits are served first. Misses go through a provider bulk
    /// endpoint when one is available, then whatever is left is fetched
    /// one asset at a time in small batches with a pause in between.
    pub async fn get_prices(
        &self,
        keys: &[AssetKey],
        force_fetch: bool,
        priority: Priority,
        role: ConsumerRole,
    ) -> HashMap<AssetKey, Option<Decimal>> {
        let mut resolved: HashMap<AssetKey, Outcome> = HashMap::new();
        let mut misses: Vec<AssetKey> = Vec::new();
        let mut seen: HashSet<AssetKey> = HashSet::new();
        let mut excluded: HashSet<&AssetKey> = HashSet::new();

        for key in keys {
            if self.config.assets.is_excluded(key) {
                excluded.insert(key);
                continue;
            }
            let canonical = self.canonical(key).clone();
            if !seen.insert(canonical.clone()) {
                continue;
            }
            if let Some(outcome) = self.static_outcome(&canonical) {
                resolved.insert(canonical, outcome);
                continue;
            }
            if !force_fetch {
                if let Some(entry) = self.cache.get(&canonical) {
                    self.counters.hit();
                    resolved.insert(canonical, Ok(entry.price));
                    continue;
                }
            }
            self.counters.miss();
            misses.push(canonical);
        }

        if !misses.is_empty() {
            if self.config.batch.enabled && misses.len() > 1 {
                for (key, price) in self.fetch_batch(&misses, priority).await {
                    resolved.insert(key, Ok(price));
                }
            }

            let remaining: Vec<AssetKey> = misses
                .into_iter()
                .filter(|k| !resolved.contains_key(k))
                .collect();
            let pause = Duration::from_millis(self.config.batch.per_asset_pause_ms);
            for (i, chunk) in remaining
                .chunks(self.config.batch.per_asset_batch_size)
                .enumerate()
            {
                if i > 0 && !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
                for key in chunk {
                    let outcome = self.fetch_validated(key, priority).await;
                    resolved.insert(key.clone(), outcome);
                }
            }
        }

        let mut results = HashMap::with_capacity(keys.len());
        for key in keys {
            if excluded.contains(key) {
                self.report_failure(key, role, &FetchFailure::Excluded);
                results.insert(key.clone(), None);
                continue;
            }
            let outcome = resolved.get(self.canonical(key));
            let price = match outcome {
                Some(Ok(price)) => Some(*price),
                Some(Err(failure)) => {
                    self.report_failure(key, role, failure);
                    None
                }
                None => None,
            };
            results.insert(key.clone(), price);
        }
        results
    }

    /// Price lookup with force-sell guidance for the risk layer.
    pub async fn get_price_with_force_sell_info(
        &self,
        key: &AssetKey,
        role: ConsumerRole,
    ) -> PriceResult {
        match self.lookup(key, false, Priority::High).await {
            Ok(price) => PriceResult::found(price),
            Err(failure) => {
                self.report_failure(key, role, &failure);
                let retry_after = self
                    .failures
                    .retry_after_at(self.canonical(key), Utc::now());
                PriceResult::missing(failure, retry_after, self.force_sell_eligible(key, role))
            }
        }
    }

    /// Whether `role` may treat a missing price for `key` as a reason to
    /// exit the position. Pegged, base, and excluded assets never are.
    pub fn force_sell_eligible(&self, key: &AssetKey, role: ConsumerRole) -> bool {
        if role != ConsumerRole::Risk {
            return false;
        }
        let assets = &self.config.assets;
        let canonical = self.canonical(key);
        !(assets.is_stable(canonical) || assets.is_base(canonical) || assets.is_excluded(key))
    }

    // -- Membership --------------------------------------------------------

    pub fn mark_active(&self, key: &AssetKey) {
        if self.membership.mark_active(key) {
            debug!(asset = %key.short(), "Marked active");
        }
    }

    pub fn unmark_active(&self, key: &AssetKey) {
        if self.membership.unmark_active(key) {
            debug!(asset = %key.short(), "Unmarked active");
        }
    }

    pub fn mark_recent_activity(&self, key: &AssetKey) {
        self.membership.mark_recent_activity(key);
        debug!(asset = %key.short(), "Marked recent activity");
    }

    pub fn active_assets(&self) -> Vec<AssetKey> {
        self.membership.active_assets()
    }

    // -- Maintenance -------------------------------------------------------

    /// Drop the cached entry for `key`, or every entry when `None`.
    pub fn clear_stale_cache(&self, key: Option<&AssetKey>) -> usize {
        match key {
            Some(key) => {
                let cleared = usize::from(self.cache.invalidate(self.canonical(key)));
                if cleared > 0 {
                    info!(asset = %key.short(), "Cleared cached price");
                }
                cleared
            }
            None => {
                let cleared = self.cache.invalidate_all();
                info!(cleared, "Cleared all cached prices");
                cleared
            }
        }
    }

    /// Invalidate and immediately refetch `key` at high priority.
    pub async fn force_refresh(&self, key: &AssetKey) -> Option<Decimal> {
        self.clear_stale_cache(Some(key));
        let price = self
            .get_price(key, true, Priority::High, ConsumerRole::General)
            .await;
        if let Some(price) = price {
            info!(asset = %key.short(), %price, "Price force-refreshed");
        }
        price
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            cache_hits: self.counters.hits(),
            cache_misses: self.counters.misses(),
            api_calls: self.counters.api_calls(),
            cache_size: self.cache.len(),
            active_assets: self.membership.active_count(),
            recent_assets: self.membership.recent_count(),
            avg_fetch_time_ms: (self.counters.avg_fetch_time_ms() * 100.0).round() / 100.0,
            hit_rate: self.counters.hit_rate(),
            price_mode: self.config.price_mode,
            failed_fetches_count: self.failures.len(),
            circuits: self.breaker.snapshot(),
            budget: self.throttler.status(),
        }
    }

    /// Interval the background refresher currently sleeps between cycles.
    pub fn current_interval(&self) -> Duration {
        self.throttler.current_interval()
    }

    // -- Lifecycle ---------------------------------------------------------

    /// Start the background refresher. No-op if it is already running.
    pub fn start_background_refresh(self: &Arc<Self>) {
        let mut slot = self.refresher.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_some() {
            warn!("Background refresher already running");
            return;
        }
        *slot = Some(refresher::spawn(Arc::downgrade(self)));
    }

    /// One refresh pass over the active set. Returns how many prices were
    /// refreshed.
    pub async fn refresh_active(&self) -> usize {
        let active = self.membership.active_assets();
        if active.is_empty() {
            debug!("No active assets to refresh");
            return 0;
        }
        let prices = self
            .get_prices(&active, true, Priority::High, ConsumerRole::General)
            .await;
        let refreshed = prices.values().filter(|p| p.is_some()).count();
        info!(
            active = active.len(),
            refreshed,
            next_in_secs = self.current_interval().as_secs(),
            "Background refresh cycle complete"
        );
        refreshed
    }

    /// Stop the background refresher, waiting up to the shutdown timeout
    /// for the current cycle to finish.
    pub async fn shutdown(&self) {
        let handle = self
            .refresher
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let Some(handle) = handle else {
            debug!("Shutdown requested with no background refresher running");
            return;
        };
        handle.stop(self.config.shutdown_timeout()).await;
        info!("Price oracle shut down");
    }

    // -- Internals ---------------------------------------------------------

    /// Key whose price `key` shares (itself unless it is a derived key).
    fn canonical<'a>(&'a self, key: &'a AssetKey) -> &'a AssetKey {
        self.config.assets.underlying(key).unwrap_or(key)
    }

    /// Outcomes decided by configuration alone.
    fn static_outcome(&self, key: &AssetKey) -> Option<Outcome> {
        let assets = &self.config.assets;
        if assets.is_excluded(key) {
            return Some(Err(FetchFailure::Excluded));
        }
        if assets.is_stable(key) {
            return Some(Ok(assets.stable_price));
        }
        None
    }

    async fn lookup(&self, key: &AssetKey, force_fetch: bool, priority: Priority) -> Outcome {
        if self.config.assets.is_excluded(key) {
            return Err(FetchFailure::Excluded);
        }
        let key = self.canonical(key);
        if let Some(outcome) = self.static_outcome(key) {
            return outcome;
        }
        if !force_fetch {
            if let Some(entry) = self.cache.get(key) {
                self.counters.hit();
                debug!(asset = %key.short(), price = %entry.price, tier = %entry.tier, "Cache hit");
                return Ok(entry.price);
            }
        }
        self.counters.miss();
        self.fetch_validated(key, priority).await
    }

    /// Fetch, validate and cache a fresh price for a canonical key.
    async fn fetch_validated(&self, key: &AssetKey, priority: Priority) -> Outcome {
        let now = Utc::now();
        if let Some(retry) = self.failures.retry_after_at(key, now) {
            debug!(asset = %key.short(), retry_in_secs = retry.as_secs(), "Backing off");
            return Err(FetchFailure::BackingOff {
                retry_after_secs: retry.as_secs().max(1),
            });
        }
        if self.sources.is_empty() {
            return Err(FetchFailure::NoSourceAvailable);
        }

        let started = Instant::now();
        let needs_consensus = self.config.assets.needs_consensus(key);
        let samples = match self.sample(key, needs_consensus).await {
            Ok(samples) => samples,
            Err(failure) => {
                self.failures.record_failure(key);
                if needs_consensus {
                    if let Some(price) = self.last_known(key, Utc::now()) {
                        return Ok(price);
                    }
                }
                return Err(failure);
            }
        };

        let Some(price) = median_price(&samples) else {
            return Err(FetchFailure::NoSourceAvailable);
        };
        if samples.len() == 1 && self.is_suspicious(key, price) {
            warn!(
                asset = %key.short(),
                source = %samples[0].source,
                "Flat 1.0 price with no second source to confirm it"
            );
            self.failures.record_failure(key);
            return Err(FetchFailure::SuspiciousPrice { price });
        }

        let validation = self.validator.validate(key, price, &samples, Some(0));
        if !validation.ok {
            let failure = validation
                .failure()
                .unwrap_or(FetchFailure::NoSourceAvailable);
            warn!(
                asset = %key.short(),
                %price,
                reason = %validation.reason,
                "Price rejected"
            );
            self.failures.record_failure(key);
            self.cache.invalidate(key);
            return Err(failure);
        }

        let source = match samples.as_slice() {
            [only] => only.source.as_str(),
            _ => CONSENSUS_SOURCE,
        };
        let fetch_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.counters.fetch_completed(fetch_ms);
        self.cache
            .store(key, validation.price, source, priority, fetch_ms, Utc::now());
        self.failures.clear(key);
        debug!(
            asset = %key.short(),
            price = %validation.price,
            source,
            samples = samples.len(),
            fetch_ms,
            "Price fetched"
        );
        Ok(validation.price)
    }

    /// A flat 1.0 for a non-pegged asset is a known fallback artifact of
    /// some providers.
    fn is_suspicious(&self, key: &AssetKey, price: Decimal) -> bool {
        price == Decimal::ONE && !self.config.assets.is_stable(key)
    }

    /// Walk the source chain in order and collect samples.
    ///
    /// Stops at the first success unless the asset needs consensus or the
    /// first price is suspicious.
    async fn sample(
        &self,
        key: &AssetKey,
        sample_all: bool,
    ) -> Result<Vec<PriceSample>, FetchFailure> {
        let timeout = self.config.request_timeout();
        let mut samples = Vec::new();
        let mut attempted = false;
        let mut last_open: Option<&'static str> = None;
        let mut last_timeout: Option<&'static str> = None;

        for source in &self.sources {
            let name = source.name();
            if self.breaker.is_open(name) {
                debug!(source = name, asset = %key.short(), "Circuit open, skipping source");
                last_open = Some(name);
                continue;
            }

            attempted = true;
            self.throttler.record_call();
            self.counters.api_call();

            match tokio::time::timeout(timeout, source.fetch(key, timeout)).await {
                Ok(Ok(price)) => {
                    self.breaker.record_success(name);
                    debug!(source = name, asset = %key.short(), %price, "Sample");
                    samples.push(PriceSample::new(name, price));
                    let unconfirmed = samples.len() == 1 && self.is_suspicious(key, price);
                    if !sample_all && !unconfirmed {
                        break;
                    }
                }
                Ok(Err(e)) => {
                    self.breaker.record_failure(name);
                    warn!(source = name, asset = %key.short(), error = %e, "Source fetch failed");
                    if e.is_timeout() {
                        last_timeout = Some(name);
                    }
                }
                Err(_) => {
                    self.breaker.record_failure(name);
                    warn!(
                        source = name,
                        asset = %key.short(),
                        timeout_secs = timeout.as_secs(),
                        "Source fetch timed out"
                    );
                    last_timeout = Some(name);
                }
            }
        }

        if !samples.is_empty() {
            return Ok(samples);
        }
        let failure = match (attempted, last_timeout, last_open) {
            (_, Some(provider), _) => FetchFailure::SourceTimeout {
                provider: provider.to_string(),
            },
            (false, None, Some(provider)) => FetchFailure::SourceUnavailable {
                provider: provider.to_string(),
            },
            _ => FetchFailure::NoSourceAvailable,
        };
        Err(failure)
    }

    /// The previous entry for a consensus asset, if young enough to serve
    /// while every source is down.
    fn last_known(&self, key: &AssetKey, now: DateTime<Utc>) -> Option<Decimal> {
        let entry = self.cache.peek(key)?;
        let age = entry.age(now);
        let max_age = config::seconds(self.config.last_known_max_age_secs);
        if age > max_age {
            return None;
        }
        warn!(
            asset = %key.short(),
            price = %entry.price,
            age_secs = age.num_seconds(),
            "All sources failed, serving last known price"
        );
        Some(entry.price)
    }

    /// Fill as many misses as possible from one bulk call per chunk.
    ///
    /// Only assets that a single sample may price are batched. Prices that
    /// fail validation are left for the per-asset path.
    async fn fetch_batch(&self, keys: &[AssetKey], priority: Priority) -> HashMap<AssetKey, Decimal> {
        let mut filled = HashMap::new();
        let now = Utc::now();
        let candidates: Vec<AssetKey> = keys
            .iter()
            .filter(|k| {
                !self.config.assets.needs_consensus(k) && !self.failures.should_skip_at(k, now)
            })
            .cloned()
            .collect();
        if candidates.len() < 2 {
            return filled;
        }
        let Some(source) = self
            .sources
            .iter()
            .find(|s| s.supports_batch() && !self.breaker.is_open(s.name()))
        else {
            return filled;
        };

        let name = source.name();
        let timeout = self.config.request_timeout();
        let delay = Duration::from_millis(self.config.batch.provider_batch_delay_ms);

        for (i, chunk) in candidates
            .chunks(self.config.batch.provider_batch_size)
            .enumerate()
        {
            if i > 0 {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if self.breaker.is_open(name) {
                    break;
                }
            }

            let started = Instant::now();
            self.counters.api_call();
            let result = tokio::time::timeout(timeout, source.fetch_batch(chunk, timeout)).await;
            let prices = match result {
                Ok(Ok(prices)) => {
                    self.breaker.record_success(name);
                    prices
                }
                Ok(Err(e)) => {
                    self.breaker.record_failure(name);
                    warn!(source = name, assets = chunk.len(), error = %e, "Batch fetch failed");
                    self.throttler.record_call();
                    continue;
                }
                Err(_) => {
                    self.breaker.record_failure(name);
                    warn!(source = name, assets = chunk.len(), "Batch fetch timed out");
                    self.throttler.record_call();
                    continue;
                }
            };
            self.throttler
                .record_calls_at(prices.len().max(1) as u64, Utc::now());
            let fetch_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            self.counters.fetch_completed(fetch_ms);

            for (key, price) in prices {
                if !chunk.contains(&key) {
                    continue;
                }
                if self.is_suspicious(&key, price) {
                    debug!(asset = %key.short(), "Flat 1.0 in batch, deferring to per-asset fetch");
                    continue;
                }
                let sample = [PriceSample::new(name, price)];
                let validation = self.validator.validate(&key, price, &sample, Some(0));
                if !validation.ok {
                    debug!(
                        asset = %key.short(),
                        reason = %validation.reason,
                        "Batch price rejected, deferring to per-asset fetch"
                    );
                    continue;
                }
                self.cache
                    .store(&key, validation.price, name, priority, fetch_ms, Utc::now());
                self.failures.clear(&key);
                filled.insert(key, validation.price);
            }
        }

        info!(
            source = name,
            requested = candidates.len(),
            filled = filled.len(),
            "Batch fetch complete"
        );
        filled
    }

    /// Log a missing price the way the consuming role acts on it.
    fn report_failure(&self, key: &AssetKey, role: ConsumerRole, failure: &FetchFailure) {
        if *failure == FetchFailure::Excluded {
            debug!(asset = %key.short(), "Asset excluded from pricing");
            return;
        }
        match role {
            ConsumerRole::CopyBot => {
                info!(asset = %key.short(), reason = %failure, "No reliable price, copy-trade skipped");
            }
            ConsumerRole::Risk => {
                let eligible = self.force_sell_eligible(key, role);
                warn!(
                    asset = %key.short(),
                    reason = %failure,
                    force_sell_eligible = eligible,
                    "No reliable price for risk check"
                );
            }
            ConsumerRole::General => {
                warn!(asset = %key.short(), reason = %failure, "No price available");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PriceBounds, SOL_MINT, USDC_MINT};
    use crate::sources::MockSourceAdapter;
    use crate::types::{SourceError, Tier};
    use rust_decimal_macros::dec;

    fn key(s: &str) -> AssetKey {
        AssetKey::new(s).unwrap()
    }

    fn config() -> OracleConfig {
        let mut config = OracleConfig::default();
        config
            .sanity_bounds
            .overrides
            .insert(key("MintA"), PriceBounds::new(dec!(50), dec!(500)));
        config.batch.per_asset_pause_ms = 0;
        config.batch.provider_batch_delay_ms = 0;
        config
    }

    fn source(name: &'static str, price: Decimal, calls: usize) -> Arc<dyn SourceAdapter> {
        let mut mock = MockSourceAdapter::new();
        mock.expect_name().return_const(name);
        mock.expect_supports_batch().return_const(false);
        mock.expect_fetch()
            .times(calls)
            .returning(move |_, _| Ok(price));
        Arc::new(mock)
    }

    fn failing(name: &'static str) -> Arc<dyn SourceAdapter> {
        let mut mock = MockSourceAdapter::new();
        mock.expect_name().return_const(name);
        mock.expect_supports_batch().return_const(false);
        mock.expect_fetch().returning(move |_, _| {
            Err(SourceError::Http {
                provider: name,
                status: 503,
            })
        });
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_cache_hit_skips_fetch() {
        let oracle = PriceOracle::new(config(), vec![source("s1", dec!(180), 1)]).unwrap();
        let a = key("MintA");
        for _ in 0..3 {
            let price = oracle
                .get_price(&a, false, Priority::High, ConsumerRole::General)
                .await;
            assert_eq!(price, Some(dec!(180)));
        }
        let stats = oracle.cache_stats();
        assert_eq!(stats.cache_hits, 2);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.api_calls, 1);
    }

    #[tokio::test]
    async fn test_fallback_to_next_source() {
        let oracle = PriceOracle::new(
            config(),
            vec![failing("down"), source("up", dec!(200), 1)],
        )
        .unwrap();
        let price = oracle
            .get_price(&key("MintA"), false, Priority::Normal, ConsumerRole::General)
            .await;
        assert_eq!(price, Some(dec!(200)));
        assert_eq!(oracle.cache.peek(&key("MintA")).unwrap().source, "up");
    }

    #[tokio::test]
    async fn test_consensus_asset_samples_every_source() {
        let mut cfg = config();
        cfg.assets.consensus_assets.insert(key("MintA"));
        let oracle = PriceOracle::new(
            cfg,
            vec![source("s1", dec!(180), 1), source("s2", dec!(185), 1)],
        )
        .unwrap();
        let price = oracle
            .get_price(&key("MintA"), false, Priority::High, ConsumerRole::General)
            .await;
        assert_eq!(price, Some(dec!(185)));
        let entry = oracle.cache.peek(&key("MintA")).unwrap();
        assert_eq!(entry.source, CONSENSUS_SOURCE);
        assert_eq!(entry.tier, Tier::Active);
    }

    #[tokio::test]
    async fn test_consensus_reject_invalidates() {
        let mut cfg = config();
        cfg.assets.consensus_assets.insert(key("MintA"));
        let oracle = PriceOracle::new(
            cfg,
            vec![source("s1", dec!(100), 2), source("s2", dec!(120), 2)],
        )
        .unwrap();
        let a = key("MintA");
        oracle.cache.store(&a, dec!(110), "old", Priority::High, 0, Utc::now());

        let result = oracle.get_price_with_force_sell_info(&a, ConsumerRole::Risk).await;
        assert_eq!(result.price, Some(dec!(110)), "fresh cache entry is served");

        let price = oracle
            .get_price(&a, true, Priority::High, ConsumerRole::General)
            .await;
        assert_eq!(price, None);
        assert!(oracle.cache.peek(&a).is_none());

        let result = oracle.get_price_with_force_sell_info(&a, ConsumerRole::Risk).await;
        assert!(matches!(
            result.failure,
            Some(FetchFailure::ConsensusFailed { .. })
        ));
        assert!(result.force_sell_eligible);
    }

    #[tokio::test]
    async fn test_last_known_served_when_all_sources_fail() {
        let oracle = PriceOracle::new(config(), vec![failing("down")]).unwrap();
        let sol = key(SOL_MINT);
        let captured = Utc::now() - chrono::Duration::seconds(600);
        oracle.cache.store(&sol, dec!(150), "old", Priority::High, 0, captured);

        let price = oracle
            .get_price(&sol, false, Priority::High, ConsumerRole::General)
            .await;
        assert_eq!(price, Some(dec!(150)));

        let stale = Utc::now() - chrono::Duration::seconds(3600);
        oracle.cache.store(&sol, dec!(150), "old", Priority::High, 0, stale);
        let price = oracle
            .get_price(&sol, false, Priority::High, ConsumerRole::General)
            .await;
        assert_eq!(price, None);
    }

    #[tokio::test]
    async fn test_suspicious_flat_price() {
        let oracle = PriceOracle::new(config(), vec![source("s1", dec!(1), 1)]).unwrap();
        let result = oracle
            .get_price_with_force_sell_info(&key("Meme"), ConsumerRole::Risk)
            .await;
        assert_eq!(result.failure, Some(FetchFailure::SuspiciousPrice { price: dec!(1) }));

        let oracle = PriceOracle::new(
            config(),
            vec![source("s1", dec!(1), 1), source("s2", dec!(1.02), 1)],
        )
        .unwrap();
        let price = oracle
            .get_price(&key("Meme"), false, Priority::Normal, ConsumerRole::General)
            .await;
        assert_eq!(price, Some(dec!(1.02)));
    }

    #[tokio::test]
    async fn test_stable_and_excluded_never_fetch() {
        let mut cfg = config();
        cfg.assets.excluded.insert(key("Banned"));
        let oracle = PriceOracle::new(cfg, vec![source("s1", dec!(5), 0)]).unwrap();

        let usdc = key(USDC_MINT);
        let result = oracle.get_price_with_force_sell_info(&usdc, ConsumerRole::Risk).await;
        assert_eq!(result.price, Some(Decimal::ONE));
        assert!(!result.force_sell_eligible);

        let banned = key("Banned");
        let result = oracle.get_price_with_force_sell_info(&banned, ConsumerRole::Risk).await;
        assert_eq!(result.failure, Some(FetchFailure::Excluded));
        assert!(!result.force_sell_eligible);
    }

    #[tokio::test]
    async fn test_derived_key_priced_from_underlying() {
        let oracle = PriceOracle::new(
            config(),
            vec![source("s1", dec!(150), 1), source("s2", dec!(151), 1)],
        )
        .unwrap();
        let staked = key("STAKED_SOL_position1");
        let price = oracle
            .get_price(&staked, false, Priority::Normal, ConsumerRole::General)
            .await;
        assert_eq!(price, Some(dec!(151)));
        assert!(oracle.cache.peek(&key(SOL_MINT)).is_some());
        assert!(oracle.cache.peek(&staked).is_none());
        assert!(!oracle.force_sell_eligible(&staked, ConsumerRole::Risk));
    }

    #[test]
    fn test_force_sell_policy() {
        let oracle = PriceOracle::new(config(), Vec::new()).unwrap();
        let meme = key("Meme");
        assert!(oracle.force_sell_eligible(&meme, ConsumerRole::Risk));
        assert!(!oracle.force_sell_eligible(&meme, ConsumerRole::CopyBot));
        assert!(!oracle.force_sell_eligible(&meme, ConsumerRole::General));
        assert!(!oracle.force_sell_eligible(&key(SOL_MINT), ConsumerRole::Risk));
        assert!(!oracle.force_sell_eligible(&key(USDC_MINT), ConsumerRole::Risk));
    }

    #[tokio::test]
    async fn test_empty_chain_is_no_source() {
        let oracle = PriceOracle::new(config(), Vec::new()).unwrap();
        let result = oracle
            .get_price_with_force_sell_info(&key("Meme"), ConsumerRole::General)
            .await;
        assert_eq!(result.failure, Some(FetchFailure::NoSourceAvailable));
    }

    #[tokio::test]
    async fn test_batch_fills_misses_with_one_call() {
        let mut mock = MockSourceAdapter::new();
        mock.expect_name().return_const("bulk");
        mock.expect_supports_batch().return_const(true);
        mock.expect_fetch().times(0);
        mock.expect_fetch_batch().times(1).returning(|assets, _| {
            Ok(assets
                .iter()
                .map(|a| (a.clone(), dec!(2.5)))
                .collect::<HashMap<_, _>>())
        });
        let oracle = PriceOracle::new(config(), vec![Arc::new(mock)]).unwrap();

        let keys = vec![key("M1"), key("M2"), key("M3")];
        let prices = oracle
            .get_prices(&keys, false, Priority::Normal, ConsumerRole::General)
            .await;
        assert_eq!(prices.len(), 3);
        assert!(prices.values().all(|p| *p == Some(dec!(2.5))));
        assert_eq!(oracle.cache_stats().api_calls, 1);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut cfg = config();
        cfg.tier_ttls.active_secs = 0;
        assert!(matches!(
            PriceOracle::new(cfg, Vec::new()),
            Err(OracleError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_stale_cache() {
        let oracle = PriceOracle::new(config(), Vec::new()).unwrap();
        let now = Utc::now();
        oracle.cache.store(&key("A"), dec!(1.5), "s", Priority::Normal, 0, now);
        oracle.cache.store(&key("B"), dec!(1.5), "s", Priority::Normal, 0, now);
        assert_eq!(oracle.clear_stale_cache(Some(&key("A"))), 1);
        assert_eq!(oracle.clear_stale_cache(None), 1);
        assert_eq!(oracle.cache_stats().cache_size, 0);
    }

    #[tokio::test]
    async fn test_excluded_derived_key_never_fetched_in_bulk() {
        let mut cfg = config();
        cfg.assets.excluded.insert(key("STAKED_SOL_bad"));
        let oracle = PriceOracle::new(cfg, vec![source("s1", dec!(150), 0)]).unwrap();
        let bad = key("STAKED_SOL_bad");

        let single = oracle
            .get_price(&bad, false, Priority::Normal, ConsumerRole::General)
            .await;
        assert_eq!(single, None);

        let prices = oracle
            .get_prices(&[bad.clone()], false, Priority::Normal, ConsumerRole::Risk)
            .await;
        assert_eq!(prices.get(&bad), Some(&None));
        assert_eq!(oracle.cache_stats().api_calls, 0);
        assert!(oracle.cache.peek(&key(SOL_MINT)).is_none());
    }

    #[tokio::test]
    async fn test_force_refresh_refetches_at_high_priority() {
        let oracle = PriceOracle::new(config(), vec![source("s1", dec!(42), 2)]).unwrap();
        let m = key("Meme");

        let price = oracle
            .get_price(&m, false, Priority::Normal, ConsumerRole::General)
            .await;
        assert_eq!(price, Some(dec!(42)));
        assert_eq!(oracle.cache.peek(&m).unwrap().tier, Tier::Background);

        assert_eq!(oracle.force_refresh(&m).await, Some(dec!(42)));
        let entry = oracle.cache.peek(&m).unwrap();
        assert_eq!(entry.tier, Tier::Active);
        assert_eq!(oracle.cache_stats().api_calls, 2);
    }

    #[tokio::test]
    async fn test_per_asset_fetches_span_several_batches() {
        let mut cfg = config();
        cfg.batch.per_asset_batch_size = 2;
        let oracle = PriceOracle::new(cfg, vec![source("s1", dec!(7), 5)]).unwrap();
        let keys: Vec<AssetKey> = (1..=5).map(|i| key(&format!("M{i}"))).collect();

        let prices = oracle
            .get_prices(&keys, false, Priority::Normal, ConsumerRole::General)
            .await;
        assert_eq!(prices.len(), 5);
        assert!(prices.values().all(|p| *p == Some(dec!(7))));
        assert_eq!(oracle.cache_stats().cache_size, 5);
    }

    #[tokio::test]
    async fn test_mixed_hits_misses_and_failures() {
        let mut mock = MockSourceAdapter::new();
        mock.expect_name().return_const("s1");
        mock.expect_supports_batch().return_const(false);
        mock.expect_fetch().times(2).returning(|asset, _| {
            if asset.as_str() == "Broken" {
                Err(SourceError::NotFound {
                    provider: "s1",
                    asset: asset.to_string(),
                })
            } else {
                Ok(dec!(3))
            }
        });
        let oracle = PriceOracle::new(config(), vec![Arc::new(mock)]).unwrap();
        oracle
            .cache
            .store(&key("Cached"), dec!(1.5), "old", Priority::High, 0, Utc::now());

        let keys = vec![key("Cached"), key(USDC_MINT), key("Fresh"), key("Broken")];
        let prices = oracle
            .get_prices(&keys, false, Priority::Normal, ConsumerRole::CopyBot)
            .await;

        assert_eq!(prices[&key("Cached")], Some(dec!(1.5)));
        assert_eq!(prices[&key(USDC_MINT)], Some(Decimal::ONE));
        assert_eq!(prices[&key("Fresh")], Some(dec!(3)));
        assert_eq!(prices[&key("Broken")], None);

        let stats = oracle.cache_stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 2);
        assert_eq!(stats.failed_fetches_count, 1);
    }

    #[tokio::test]
    async fn test_recent_activity_writes_recent_tier() {
        let oracle = PriceOracle::new(config(), vec![source("s1", dec!(9), 2)]).unwrap();
        let m = key("Meme");

        oracle.mark_recent_activity(&m);
        oracle
            .get_price(&m, false, Priority::Normal, ConsumerRole::General)
            .await;
        assert_eq!(oracle.cache.peek(&m).unwrap().tier, Tier::Recent);

        oracle.mark_active(&m);
        assert_eq!(oracle.active_assets(), vec![m.clone()]);
        oracle
            .get_price(&m, true, Priority::Normal, ConsumerRole::General)
            .await;
        assert_eq!(oracle.cache.peek(&m).unwrap().tier, Tier::Active);

        oracle.unmark_active(&m);
        assert!(oracle.active_assets().is_empty());
        assert_eq!(oracle.cache_stats().recent_assets, 1);
    }
}
