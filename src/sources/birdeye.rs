//! Birdeye price API.
//!
//! Base URL: https://public-api.birdeye.so
//! Auth: `X-API-KEY` header. Every call is metered against the account's
//! compute-unit budget, so bulk lookups go through `multi_price`.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{http_client, parse_json, send, to_price, SourceAdapter};
use crate::types::{AssetKey, SourceError};

const BASE_URL: &str = "https://public-api.birdeye.so";
const PROVIDER: &str = "birdeye";
const CHAIN: &str = "solana";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BirdeyeResponse<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BirdeyePrice {
    value: Option<f64>,
}

/// Parse a `/defi/price` body.
pub(crate) fn parse_price(body: &str, asset: &AssetKey) -> Result<Decimal, SourceError> {
    let resp: BirdeyeResponse<BirdeyePrice> = parse_json(PROVIDER, body)?;
    if !resp.success {
        return Err(SourceError::InvalidResponse {
            provider: PROVIDER,
            message: resp.message.unwrap_or_else(|| "success=false".to_string()),
        });
    }
    match resp.data.and_then(|d| d.value) {
        Some(value) if value > 0.0 => to_price(PROVIDER, value),
        _ => Err(SourceError::NotFound {
            provider: PROVIDER,
            asset: asset.to_string(),
        }),
    }
}

/// Parse a `multi_price` body, keeping only the requested assets with a
/// positive price.
pub(crate) fn parse_multi_price(
    body: &str,
    requested: &[AssetKey],
) -> Result<HashMap<AssetKey, Decimal>, SourceError> {
    let resp: BirdeyeResponse<HashMap<String, Option<BirdeyePrice>>> =
        parse_json(PROVIDER, body)?;
    if !resp.success {
        return Err(SourceError::InvalidResponse {
            provider: PROVIDER,
            message: resp.message.unwrap_or_else(|| "success=false".to_string()),
        });
    }
    let data = resp.data.unwrap_or_default();

    let mut prices = HashMap::new();
    for key in requested {
        let Some(value) = data.get(key.as_str()).and_then(|p| p.as_ref()).and_then(|p| p.value)
        else {
            continue;
        };
        match to_price(PROVIDER, value) {
            Ok(price) => {
                prices.insert(key.clone(), price);
            }
            Err(e) => debug!(asset = %key.short(), error = %e, "Skipping Birdeye batch value"),
        }
    }
    Ok(prices)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct BirdeyeSource {
    http: Client,
    api_key: SecretString,
    base_url: String,
}

impl BirdeyeSource {
    pub fn new(api_key: String) -> Result<Self> {
        Ok(Self {
            http: http_client(PROVIDER)?,
            api_key: SecretString::new(api_key),
            base_url: BASE_URL.to_string(),
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .header("X-API-KEY", self.api_key.expose_secret().as_str())
            .header("X-Chain", CHAIN)
            .header("accept", "application/json")
    }
}

#[async_trait]
impl SourceAdapter for BirdeyeSource {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn fetch(&self, asset: &AssetKey, timeout: Duration) -> Result<Decimal, SourceError> {
        if self.api_key.expose_secret().is_empty() {
            return Err(SourceError::NotConfigured { provider: PROVIDER });
        }
        let url = format!(
            "{}/defi/price?address={}&chain={CHAIN}",
            self.base_url,
            urlencoding::encode(asset.as_str()),
        );
        let body = send(PROVIDER, self.get(&url), timeout).await?;
        let price = parse_price(&body, asset).inspect_err(|e| {
            warn!(asset = %asset.short(), error = %e, "Birdeye returned no price");
        })?;
        debug!(asset = %asset.short(), %price, "Birdeye price");
        Ok(price)
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn fetch_batch(
        &self,
        assets: &[AssetKey],
        timeout: Duration,
    ) -> Result<HashMap<AssetKey, Decimal>, SourceError> {
        if self.api_key.expose_secret().is_empty() {
            return Err(SourceError::NotConfigured { provider: PROVIDER });
        }
        if assets.is_empty() {
            return Ok(HashMap::new());
        }
        let ids = assets
            .iter()
            .map(|a| urlencoding::encode(a.as_str()).into_owned())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/public/multi_price?list_address={ids}", self.base_url);
        let body = send(PROVIDER, self.get(&url), timeout).await?;
        let prices = parse_multi_price(&body, assets)?;
        debug!(requested = assets.len(), filled = prices.len(), "Birdeye batch");
        Ok(prices)
    }
}
