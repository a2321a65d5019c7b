//! Pyth Hermes latest price feeds.
//!
//! Base URL: https://hermes.pyth.network
//! Auth: none. Feeds are keyed by a 32-byte hex feed id, so only assets with
//! a configured id can be priced here. Prices arrive as an integer mantissa
//! plus a base-10 exponent.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::{http_client, parse_json, send, SourceAdapter};
use crate::types::{AssetKey, SourceError};

const BASE_URL: &str = "https://hermes.pyth.network";
const PROVIDER: &str = "pyth";

#[derive(Debug, Deserialize)]
struct LatestResponse {
    #[serde(default)]
    parsed: Vec<ParsedFeed>,
}

#[derive(Debug, Deserialize)]
struct ParsedFeed {
    id: String,
    price: FeedPrice,
}

#[derive(Debug, Deserialize)]
struct FeedPrice {
    price: String,
    expo: i32,
}

/// Feed ids compare without `0x` and case-insensitively.
fn normalize_id(id: &str) -> String {
    id.trim().trim_start_matches("0x").to_ascii_lowercase()
}

/// `mantissa * 10^expo` as a positive `Decimal`.
pub(crate) fn scaled_price(mantissa: &str, expo: i32) -> Result<Decimal, SourceError> {
    let invalid = |message: String| SourceError::InvalidResponse {
        provider: PROVIDER,
        message,
    };
    let mantissa: i64 = mantissa
        .parse()
        .map_err(|e| invalid(format!("bad price mantissa {mantissa:?}: {e}")))?;
    if mantissa <= 0 {
        return Err(invalid(format!("non-positive price mantissa {mantissa}")));
    }
    let price = if expo <= 0 {
        Decimal::try_new(mantissa, expo.unsigned_abs())
            .map_err(|e| invalid(format!("exponent {expo} out of range: {e}")))?
    } else {
        let factor = u32::try_from(expo)
            .ok()
            .and_then(|e| 10_i64.checked_pow(e))
            .ok_or_else(|| invalid(format!("exponent {expo} out of range")))?;
        Decimal::from(mantissa)
            .checked_mul(Decimal::from(factor))
            .ok_or_else(|| invalid(format!("price overflow at exponent {expo}")))?
    };
    Ok(price.normalize())
}

/// Parse a `v2/updates/price/latest` body and map feed ids back to assets.
pub(crate) fn parse_latest(
    body: &str,
    ids: &[(AssetKey, String)],
) -> Result<HashMap<AssetKey, Decimal>, SourceError> {
    let resp: LatestResponse = parse_json(PROVIDER, body)?;
    let by_id: HashMap<String, &FeedPrice> = resp
        .parsed
        .iter()
        .map(|feed| (normalize_id(&feed.id), &feed.price))
        .collect();

    let mut prices = HashMap::new();
    for (key, id) in ids {
        if let Some(feed) = by_id.get(&normalize_id(id)) {
            if let Ok(price) = scaled_price(&feed.price, feed.expo) {
                prices.insert(key.clone(), price);
            }
        }
    }
    Ok(prices)
}

pub struct PythSource {
    http: Client,
    feed_ids: HashMap<AssetKey, String>,
}

impl PythSource {
    pub fn new(feed_ids: HashMap<AssetKey, String>) -> Result<Self> {
        Ok(Self {
            http: http_client(PROVIDER)?,
            feed_ids,
        })
    }

    fn known(&self, assets: &[AssetKey]) -> Vec<(AssetKey, String)> {
        assets
            .iter()
            .filter_map(|a| self.feed_ids.get(a).map(|id| (a.clone(), id.clone())))
            .collect()
    }

    async fn request(
        &self,
        ids: &[(AssetKey, String)],
        timeout: Duration,
    ) -> Result<HashMap<AssetKey, Decimal>, SourceError> {
        let query = ids
            .iter()
            .map(|(_, id)| format!("ids[]={}", urlencoding::encode(id)))
            .collect::<Vec<_>>()
            .join("&");
        let url = format!("{BASE_URL}/v2/updates/price/latest?{query}&parsed=true");
        let body = send(PROVIDER, self.http.get(&url), timeout).await?;
        parse_latest(&body, ids)
    }
}

#[async_trait]
impl SourceAdapter for PythSource {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn fetch(&self, asset: &AssetKey, timeout: Duration) -> Result<Decimal, SourceError> {
        let not_found = || SourceError::NotFound {
            provider: PROVIDER,
            asset: asset.to_string(),
        };
        let ids = self.known(std::slice::from_ref(asset));
        if ids.is_empty() {
            return Err(not_found());
        }
        let prices = self.request(&ids, timeout).await?;
        prices.get(asset).copied().ok_or_else(not_found)
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn fetch_batch(
        &self,
        assets: &[AssetKey],
        timeout: Duration,
    ) -> Result<HashMap<AssetKey, Decimal>, SourceError> {
        let ids = self.known(assets);
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.request(&ids, timeout).await
    }
}
