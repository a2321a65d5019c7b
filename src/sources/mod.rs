//! Upstream price sources.
//!
//! Defines the `SourceAdapter` trait and one implementation per provider:
//! - Birdeye: keyed REST API, single and multi-price
//! - Jupiter: public lite price API, comma-separated bulk lookup
//! - QuickNode: `qn_getTokenPrice` JSON-RPC add-on on a private endpoint
//! - Pump.fun: per-token price endpoint for bonding-curve tokens
//! - CoinGecko: simple price API, only for assets with a known coin id
//! - Pyth: Hermes latest price feeds, only for assets with a known feed id
//!
//! Adapters hold no shared state. Health tracking, budget accounting and
//! validation all happen in the oracle around them.

pub mod birdeye;
pub mod coingecko;
pub mod jupiter;
pub mod pumpfun;
pub mod pyth;
pub mod quicknode;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{AppConfig, SourcesConfig};
use crate::types::{AssetKey, PriceMode, SourceError};

pub use birdeye::BirdeyeSource;
pub use coingecko::CoinGeckoSource;
pub use jupiter::JupiterSource;
pub use pumpfun::PumpFunSource;
pub use pyth::PythSource;
pub use quicknode::QuickNodeSource;

const USER_AGENT: &str = "price-oracle/0.1.0";

/// One upstream price provider.
///
/// `fetch` must respect `timeout`; the oracle additionally bounds every call
/// with the same deadline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Provider name for logging, circuit tracking and cache provenance.
    fn name(&self) -> &'static str;

    /// Fetch the USD price of a single asset.
    async fn fetch(&self, asset: &AssetKey, timeout: Duration) -> Result<Decimal, SourceError>;

    /// Whether `fetch_batch` is backed by a bulk endpoint.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Fetch many assets in one upstream call. Assets the provider has no
    /// price for are absent from the map.
    async fn fetch_batch(
        &self,
        assets: &[AssetKey],
        timeout: Duration,
    ) -> Result<HashMap<AssetKey, Decimal>, SourceError> {
        let _ = (assets, timeout);
        Err(SourceError::NotConfigured {
            provider: self.name(),
        })
    }
}

// ---------------------------------------------------------------------------
// Shared HTTP helpers
// ---------------------------------------------------------------------------

/// Build an adapter's HTTP client. Per-request deadlines are set in [`send`].
pub(crate) fn http_client(provider: &str) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(USER_AGENT)
        .build()
        .with_context(|| format!("Failed to build HTTP client for {provider}"))
}

/// Send a request and return the body of a 2xx response.
pub(crate) async fn send(
    provider: &'static str,
    request: RequestBuilder,
    timeout: Duration,
) -> Result<String, SourceError> {
    let resp = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| SourceError::from_reqwest(provider, e))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(SourceError::Http {
            provider,
            status: status.as_u16(),
        });
    }

    resp.text()
        .await
        .map_err(|e| SourceError::from_reqwest(provider, e))
}

/// Parse a JSON body, mapping errors to `InvalidResponse`.
pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    provider: &'static str,
    body: &str,
) -> Result<T, SourceError> {
    serde_json::from_str(body).map_err(|e| SourceError::InvalidResponse {
        provider,
        message: e.to_string(),
    })
}

/// Convert a provider float to a positive `Decimal`.
pub(crate) fn to_price(provider: &'static str, value: f64) -> Result<Decimal, SourceError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(SourceError::InvalidResponse {
            provider,
            message: format!("non-positive price {value}"),
        });
    }
    Decimal::try_from(value).map_err(|e| SourceError::InvalidResponse {
        provider,
        message: e.to_string(),
    })
}

/// Parse a provider price string to a positive `Decimal`.
pub(crate) fn str_to_price(provider: &'static str, value: &str) -> Result<Decimal, SourceError> {
    let price = value
        .parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(value))
        .map_err(|e| SourceError::InvalidResponse {
            provider,
            message: format!("unparseable price {value:?}: {e}"),
        })?;
    if price <= Decimal::ZERO {
        return Err(SourceError::InvalidResponse {
            provider,
            message: format!("non-positive price {price}"),
        });
    }
    Ok(price)
}

// ---------------------------------------------------------------------------
// Chain construction
// ---------------------------------------------------------------------------

fn env_value(name: Option<&String>) -> Option<String> {
    let name = name?;
    AppConfig::resolve_env(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// Build the ordered fallback chain for the configured price mode.
///
/// Adapters without credentials are left out.
pub fn build_chain(config: &AppConfig) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let sources = &config.sources;
    let birdeye = match env_value(sources.birdeye_api_key_env.as_ref()) {
        Some(key) => Some(Arc::new(BirdeyeSource::new(key)?) as Arc<dyn SourceAdapter>),
        None => {
            info!("Birdeye API key not set, Birdeye source disabled");
            None
        }
    };
    let quicknode = match env_value(sources.quicknode_rpc_env.as_ref()) {
        Some(endpoint) => {
            Some(Arc::new(QuickNodeSource::new(endpoint)?) as Arc<dyn SourceAdapter>)
        }
        None => {
            info!("QuickNode endpoint not set, QuickNode source disabled");
            None
        }
    };
    let jupiter = enabled(sources.jupiter_enabled, || {
        Ok(Arc::new(JupiterSource::new()?) as Arc<dyn SourceAdapter>)
    })?;
    let pumpfun = enabled(sources.pumpfun_enabled, || {
        Ok(Arc::new(PumpFunSource::new()?) as Arc<dyn SourceAdapter>)
    })?;
    let coingecko = coingecko(sources)?;
    let pyth = pyth(sources)?;

    let ordered = match config.oracle.price_mode {
        PriceMode::Birdeye => vec![birdeye, quicknode, jupiter, coingecko, pyth],
        PriceMode::Jupiter => vec![quicknode, jupiter, birdeye, pumpfun, coingecko, pyth],
    };
    let chain: Vec<Arc<dyn SourceAdapter>> = ordered.into_iter().flatten().collect();

    info!(
        mode = %config.oracle.price_mode,
        chain = ?chain.iter().map(|s| s.name()).collect::<Vec<_>>(),
        "Source chain built"
    );
    Ok(chain)
}

fn enabled(
    on: bool,
    build: impl FnOnce() -> Result<Arc<dyn SourceAdapter>>,
) -> Result<Option<Arc<dyn SourceAdapter>>> {
    if on {
        build().map(Some)
    } else {
        Ok(None)
    }
}

fn coingecko(sources: &SourcesConfig) -> Result<Option<Arc<dyn SourceAdapter>>> {
    if !sources.coingecko_enabled || sources.coingecko_ids.is_empty() {
        return Ok(None);
    }
    let source = CoinGeckoSource::new(sources.coingecko_ids.clone())?;
    Ok(Some(Arc::new(source)))
}

fn pyth(sources: &SourcesConfig) -> Result<Option<Arc<dyn SourceAdapter>>> {
    if !sources.pyth_enabled || sources.pyth_feed_ids.is_empty() {
        return Ok(None);
    }
    let source = PythSource::new(sources.pyth_feed_ids.clone())?;
    Ok(Some(Arc::new(source)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_to_price_rejects_non_positive() {
        assert!(to_price("t", 0.0).is_err());
        assert!(to_price("t", -1.0).is_err());
        assert!(to_price("t", f64::NAN).is_err());
        assert!(to_price("t", f64::INFINITY).is_err());
        assert_eq!(to_price("t", 1.5).unwrap(), dec!(1.5));
    }

    #[test]
    fn test_str_to_price() {
        assert_eq!(str_to_price("t", "185.25").unwrap(), dec!(185.25));
        assert_eq!(str_to_price("t", "1.5e-5").unwrap(), dec!(0.000015));
        assert!(str_to_price("t", "abc").is_err());
        assert!(str_to_price("t", "0").is_err());
    }

    #[test]
    fn test_build_chain_order_without_credentials() {
        let mut config: AppConfig = toml::from_str("").unwrap();
        config.sources.birdeye_api_key_env = None;
        config.sources.quicknode_rpc_env = None;

        let names = |c: &AppConfig| -> Vec<&'static str> {
            build_chain(c).unwrap().iter().map(|s| s.name()).collect()
        };
        assert_eq!(names(&config), vec!["jupiter", "coingecko", "pyth"]);

        config.oracle.price_mode = PriceMode::Jupiter;
        assert_eq!(names(&config), vec!["jupiter", "pumpfun", "coingecko", "pyth"]);

        config.sources.coingecko_enabled = false;
        config.sources.pumpfun_enabled = false;
        assert_eq!(names(&config), vec!["jupiter", "pyth"]);

        config.sources.pyth_feed_ids.clear();
        assert_eq!(names(&config), vec!["jupiter"]);
    }

    #[tokio::test]
    async fn test_default_fetch_batch_is_not_configured() {
        struct Single;

        #[async_trait]
        impl SourceAdapter for Single {
            fn name(&self) -> &'static str {
                "single"
            }
            async fn fetch(&self, _: &AssetKey, _: Duration) -> Result<Decimal, SourceError> {
                Ok(dec!(1))
            }
        }

        let s = Single;
        assert!(!s.supports_batch());
        let err = s.fetch_batch(&[], Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, SourceError::NotConfigured { provider: "single" });
    }
}
