//! End-to-end lookup scenarios through `PriceOracle`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use price_oracle::config::{OracleConfig, PriceBounds};
use price_oracle::engine::PriceOracle;
use price_oracle::sources::SourceAdapter;
use price_oracle::types::{AssetKey, ConsumerRole, FetchFailure, Priority};

use crate::mock_source::MockSource;

fn key(s: &str) -> AssetKey {
    AssetKey::new(s).unwrap()
}

fn config() -> OracleConfig {
    let mut config = OracleConfig::default();
    config.batch.per_asset_pause_ms = 0;
    config.batch.provider_batch_delay_ms = 0;
    config
}

fn oracle(config: OracleConfig, sources: Vec<Arc<MockSource>>) -> PriceOracle {
    let chain = sources
        .into_iter()
        .map(|s| s as Arc<dyn SourceAdapter>)
        .collect();
    PriceOracle::new(config, chain).unwrap()
}

async fn price(oracle: &PriceOracle, asset: &str) -> Option<Decimal> {
    oracle
        .get_price(&key(asset), false, Priority::Normal, ConsumerRole::General)
        .await
}

#[tokio::test]
async fn test_repeated_lookup_fetches_once() {
    let source = MockSource::new("primary", dec!(2.5));
    let oracle = oracle(config(), vec![Arc::clone(&source)]);

    assert_eq!(price(&oracle, "MintB").await, Some(dec!(2.5)));
    assert_eq!(price(&oracle, "MintB").await, Some(dec!(2.5)));

    assert_eq!(source.calls(), 1);
    let stats = oracle.cache_stats();
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.api_calls, 1);
    assert_eq!(stats.cache_size, 1);
}

#[tokio::test]
async fn test_consensus_asset_end_to_end() {
    let mut config = config();
    config.assets.consensus_assets.insert(key("MintA"));
    config
        .sanity_bounds
        .overrides
        .insert(key("MintA"), PriceBounds::new(dec!(50), dec!(500)));
    let a = MockSource::new("a", dec!(180));
    let b = MockSource::new("b", dec!(185));
    let oracle = oracle(config, vec![Arc::clone(&a), Arc::clone(&b)]);

    assert_eq!(price(&oracle, "MintA").await, Some(dec!(185)));
    assert_eq!(price(&oracle, "MintA").await, Some(dec!(185)));

    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
    assert_eq!(oracle.cache_stats().api_calls, 2);
}

#[tokio::test]
async fn test_consensus_asset_serves_last_known_when_sources_fail() {
    let mut config = config();
    config.assets.consensus_assets.insert(key("MintA"));
    config
        .sanity_bounds
        .overrides
        .insert(key("MintA"), PriceBounds::new(dec!(50), dec!(500)));
    let a = MockSource::new("a", dec!(180));
    let b = MockSource::new("b", dec!(185));
    let oracle = oracle(config, vec![Arc::clone(&a), Arc::clone(&b)]);

    assert_eq!(price(&oracle, "MintA").await, Some(dec!(185)));

    a.set_failing(true);
    b.set_failing(true);
    let refreshed = oracle
        .get_price(&key("MintA"), true, Priority::High, ConsumerRole::Risk)
        .await;
    assert_eq!(refreshed, Some(dec!(185)));
}

#[tokio::test]
async fn test_out_of_bounds_price_is_not_cached() {
    let source = MockSource::new("primary", dec!(1000));
    let oracle = oracle(config(), vec![Arc::clone(&source)]);

    let result = oracle
        .get_price_with_force_sell_info(&key("MintB"), ConsumerRole::Risk)
        .await;
    assert!(!result.success);
    assert!(matches!(result.failure, Some(FetchFailure::OutOfBounds { .. })));
    assert!(result.force_sell_eligible);
    assert_eq!(oracle.cache_stats().cache_size, 0);

    source.set_price(dec!(42));
    assert_eq!(price(&oracle, "MintB").await, Some(dec!(42)));
}

#[tokio::test]
async fn test_open_circuit_skips_source() {
    let flaky = MockSource::failing("flaky");
    let steady = MockSource::new("steady", dec!(3));
    let oracle = oracle(config(), vec![Arc::clone(&flaky), Arc::clone(&steady)]);

    for asset in ["M1", "M2", "M3"] {
        assert_eq!(price(&oracle, asset).await, Some(dec!(3)));
    }
    assert_eq!(flaky.calls(), 3);

    assert_eq!(price(&oracle, "M4").await, Some(dec!(3)));
    assert_eq!(flaky.calls(), 3);
    assert_eq!(steady.calls(), 4);

    let stats = oracle.cache_stats();
    assert_eq!(stats.degraded_sources(), vec!["flaky"]);
}

#[tokio::test]
async fn test_repeated_failures_back_off() {
    let mut config = config();
    config.circuit_breaker.failure_threshold = 100;
    let source = MockSource::failing("primary");
    let oracle = oracle(config, vec![Arc::clone(&source)]);
    let mint = key("MintB");

    for _ in 0..4 {
        let got = oracle
            .get_price(&mint, true, Priority::Normal, ConsumerRole::CopyBot)
            .await;
        assert!(got.is_none());
    }
    assert_eq!(source.calls(), 4);

    let result = oracle
        .get_price_with_force_sell_info(&mint, ConsumerRole::Risk)
        .await;
    assert_eq!(source.calls(), 4);
    assert!(matches!(result.failure, Some(FetchFailure::BackingOff { .. })));
    assert!(result.retry_after.is_some());
    assert!(result.force_sell_eligible);
    assert_eq!(oracle.cache_stats().failed_fetches_count, 1);
}

#[tokio::test]
async fn test_slow_source_times_out_and_falls_back() {
    let mut config = config();
    config.request_timeout_secs = 1;
    let slow = MockSource::slow("slow", dec!(9), Duration::from_secs(3));
    let fast = MockSource::new("fast", dec!(4));
    let oracle = oracle(config, vec![Arc::clone(&slow), Arc::clone(&fast)]);

    assert_eq!(price(&oracle, "MintB").await, Some(dec!(4)));
    assert_eq!(slow.calls(), 1);
    assert_eq!(fast.calls(), 1);
}

#[tokio::test]
async fn test_batch_lookup_uses_bulk_endpoint() {
    let source = MockSource::batching("bulk", dec!(0.5));
    let oracle = oracle(config(), vec![Arc::clone(&source)]);
    let keys = vec![key("M1"), key("M2"), key("M3")];

    let prices = oracle
        .get_prices(&keys, false, Priority::Normal, ConsumerRole::General)
        .await;
    assert_eq!(prices.len(), 3);
    assert!(prices.values().all(|p| *p == Some(dec!(0.5))));
    assert_eq!(source.batch_calls(), 1);
    assert_eq!(source.calls(), 0);

    oracle
        .get_prices(&keys, false, Priority::Normal, ConsumerRole::General)
        .await;
    assert_eq!(source.batch_calls(), 1);
    assert_eq!(oracle.cache_stats().cache_hits, 3);
}

#[tokio::test]
async fn test_background_refresh_and_shutdown() {
    let source = MockSource::new("primary", dec!(2));
    let oracle = Arc::new(oracle(config(), vec![Arc::clone(&source)]));

    oracle.mark_active(&key("MintB"));
    oracle.start_background_refresh();

    for _ in 0..100 {
        if source.calls() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(source.calls(), 1);

    tokio::time::timeout(Duration::from_secs(2), oracle.shutdown())
        .await
        .expect("shutdown should finish within the timeout");

    let stats = oracle.cache_stats();
    assert_eq!(stats.active_assets, 1);
    assert_eq!(stats.cache_size, 1);
}
