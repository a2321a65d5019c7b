//! Jupiter lite price API.
//!
//! Base URL: https://lite-api.jup.ag/price/v2
//! Auth: none. `ids` takes a comma-separated list of mints, so one call
//! covers a whole batch.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{http_client, parse_json, send, str_to_price, SourceAdapter};
use crate::types::{AssetKey, SourceError};

const BASE_URL: &str = "https://lite-api.jup.ag/price/v2";
const PROVIDER: &str = "jupiter";

#[derive(Debug, Deserialize)]
struct JupiterResponse {
    #[serde(default)]
    data: HashMap<String, Option<JupiterPrice>>,
}

#[derive(Debug, Deserialize)]
struct JupiterPrice {
    /// Decimal string, e.g. `"185.4213"`.
    price: Option<String>,
}

/// Parse a price v2 body into prices for the requested assets.
pub(crate) fn parse_prices(
    body: &str,
    requested: &[AssetKey],
) -> Result<HashMap<AssetKey, Decimal>, SourceError> {
    let resp: JupiterResponse = parse_json(PROVIDER, body)?;
    let mut prices = HashMap::new();
    for key in requested {
        let raw = resp
            .data
            .get(key.as_str())
            .and_then(|p| p.as_ref())
            .and_then(|p| p.price.as_deref());
        if let Some(raw) = raw {
            match str_to_price(PROVIDER, raw) {
                Ok(price) => {
                    prices.insert(key.clone(), price);
                }
                Err(e) => debug!(asset = %key.short(), error = %e, "Skipping Jupiter value"),
            }
        }
    }
    Ok(prices)
}

pub struct JupiterSource {
    http: Client,
    base_url: String,
}

impl JupiterSource {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: http_client(PROVIDER)?,
            base_url: BASE_URL.to_string(),
        })
    }

    async fn request(
        &self,
        assets: &[AssetKey],
        timeout: Duration,
    ) -> Result<HashMap<AssetKey, Decimal>, SourceError> {
        let ids = assets
            .iter()
            .map(|a| urlencoding::encode(a.as_str()).into_owned())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}?ids={ids}", self.base_url);
        let body = send(PROVIDER, self.http.get(&url), timeout).await?;
        parse_prices(&body, assets)
    }
}

#[async_trait]
impl SourceAdapter for JupiterSource {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn fetch(&self, asset: &AssetKey, timeout: Duration) -> Result<Decimal, SourceError> {
        let prices = self.request(std::slice::from_ref(asset), timeout).await?;
        prices.get(asset).copied().ok_or_else(|| SourceError::NotFound {
            provider: PROVIDER,
            asset: asset.to_string(),
        })
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn fetch_batch(
        &self,
        assets: &[AssetKey],
        timeout: Duration,
    ) -> Result<HashMap<AssetKey, Decimal>, SourceError> {
        if assets.is_empty() {
            return Ok(HashMap::new());
        }
        self.request(assets, timeout).await
    }
}
