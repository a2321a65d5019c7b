//! Mock price source for integration testing.
//!
//! Provides a deterministic `SourceAdapter` that returns a configurable
//! price, can be switched to failing, and counts every call. All state is
//! in-memory with no network access.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use price_oracle::sources::SourceAdapter;
use price_oracle::types::{AssetKey, SourceError};

/// A mock price source for deterministic testing.
pub struct MockSource {
    name: &'static str,
    price: Mutex<Decimal>,
    failing: AtomicBool,
    delay: Option<Duration>,
    batch: bool,
    calls: AtomicUsize,
    batch_calls: AtomicUsize,
}

impl MockSource {
    /// A healthy single-asset source returning `price` for every asset.
    pub fn new(name: &'static str, price: Decimal) -> Arc<Self> {
        Arc::new(Self::build(name, price, None, false))
    }

    /// A source that always fails with HTTP 503.
    pub fn failing(name: &'static str) -> Arc<Self> {
        let source = Self::build(name, Decimal::ONE, None, false);
        source.failing.store(true, Ordering::SeqCst);
        Arc::new(source)
    }

    /// A source that sleeps for `delay` before answering.
    pub fn slow(name: &'static str, price: Decimal, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(name, price, Some(delay), false))
    }

    /// A source that also serves a bulk endpoint.
    pub fn batching(name: &'static str, price: Decimal) -> Arc<Self> {
        Arc::new(Self::build(name, price, None, true))
    }

    fn build(name: &'static str, price: Decimal, delay: Option<Duration>, batch: bool) -> Self {
        Self {
            name,
            price: Mutex::new(price),
            failing: AtomicBool::new(false),
            delay,
            batch,
            calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_price(&self, price: Decimal) {
        *self.price.lock().unwrap() = price;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Single-asset calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Bulk calls made so far.
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    async fn respond(&self) -> Result<Decimal, SourceError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::Http {
                provider: self.name,
                status: 503,
            });
        }
        Ok(*self.price.lock().unwrap())
    }
}

#[async_trait]
impl SourceAdapter for MockSource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self, _asset: &AssetKey, _timeout: Duration) -> Result<Decimal, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await
    }

    fn supports_batch(&self) -> bool {
        self.batch
    }

    async fn fetch_batch(
        &self,
        assets: &[AssetKey],
        _timeout: Duration,
    ) -> Result<HashMap<AssetKey, Decimal>, SourceError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let price = self.respond().await?;
        Ok(assets.iter().map(|a| (a.clone(), price)).collect())
    }
}
