//! CoinGecko simple price API.
//!
//! Base URL: https://api.coingecko.com/api/v3
//! Auth: none (public tier, ~30 req/min). CoinGecko is keyed by coin id, not
//! mint, so only assets with a configured id can be priced here.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::{http_client, parse_json, send, to_price, SourceAdapter};
use crate::types::{AssetKey, SourceError};

const BASE_URL: &str = "https://api.coingecko.com/api/v3";
const PROVIDER: &str = "coingecko";

#[derive(Debug, Deserialize)]
struct UsdQuote {
    usd: Option<f64>,
}

/// Parse a `simple/price` body and map coin ids back to asset keys.
pub(crate) fn parse_simple_price(
    body: &str,
    ids: &[(AssetKey, String)],
) -> Result<HashMap<AssetKey, Decimal>, SourceError> {
    let resp: HashMap<String, UsdQuote> = parse_json(PROVIDER, body)?;
    let mut prices = HashMap::new();
    for (key, id) in ids {
        if let Some(usd) = resp.get(id).and_then(|q| q.usd) {
            if let Ok(price) = to_price(PROVIDER, usd) {
                prices.insert(key.clone(), price);
            }
        }
    }
    Ok(prices)
}

pub struct CoinGeckoSource {
    http: Client,
    ids: HashMap<AssetKey, String>,
}

impl CoinGeckoSource {
    pub fn new(ids: HashMap<AssetKey, String>) -> Result<Self> {
        Ok(Self {
            http: http_client(PROVIDER)?,
            ids,
        })
    }

    fn known(&self, assets: &[AssetKey]) -> Vec<(AssetKey, String)> {
        assets
            .iter()
            .filter_map(|a| self.ids.get(a).map(|id| (a.clone(), id.clone())))
            .collect()
    }

    async fn request(
        &self,
        ids: &[(AssetKey, String)],
        timeout: Duration,
    ) -> Result<HashMap<AssetKey, Decimal>, SourceError> {
        let joined = ids
            .iter()
            .map(|(_, id)| urlencoding::encode(id).into_owned())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{BASE_URL}/simple/price?ids={joined}&vs_currencies=usd");
        let body = send(PROVIDER, self.http.get(&url), timeout).await?;
        parse_simple_price(&body, ids)
    }
}

#[async_trait]
impl SourceAdapter for CoinGeckoSource {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn fetch(&self, asset: &AssetKey, timeout: Duration) -> Result<Decimal, SourceError> {
        let ids = self.known(std::slice::from_ref(asset));
        if ids.is_empty() {
            return Err(SourceError::NotFound {
                provider: PROVIDER,
                asset: asset.to_string(),
            });
        }
        let prices = self.request(&ids, timeout).await?;
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
        let ids = self.known(assets);
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.request(&ids, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn key(s: &str) -> AssetKey {
        AssetKey::new(s).unwrap()
    }

    #[test]
    fn test_parse_simple_price() {
        let body = r#"{"solana":{"usd":182.5},"bonk":{}}"#;
        let ids = vec![
            (key("SolMint"), "solana".to_string()),
            (key("BonkMint"), "bonk".to_string()),
        ];
        let prices = parse_simple_price(body, &ids).unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[&key("SolMint")], dec!(182.5));
    }

    #[test]
    fn test_unmapped_asset_is_not_found() {
        let source = CoinGeckoSource::new(HashMap::new()).unwrap();
        let err = tokio_test::block_on(source.fetch(&key("A"), Duration::from_secs(1))).unwrap_err();
        assert!(matches!(err, SourceError::NotFound { .. }));

        let batch = tokio_test::block_on(source.fetch_batch(&[key("A")], Duration::from_secs(1)));
        assert!(batch.unwrap().is_empty());
    }
}
