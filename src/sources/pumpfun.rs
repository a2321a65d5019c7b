//! Pump.fun token price endpoint.
//!
//! Covers bonding-curve tokens that the aggregators have not indexed yet.
//! Single-asset only.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use super::{http_client, parse_json, send, to_price, SourceAdapter};
use crate::types::{AssetKey, SourceError};

const BASE_URL: &str = "https://api.pump.fun/v1/token";
const PROVIDER: &str = "pumpfun";

#[derive(Debug, Deserialize)]
struct PumpPrice {
    price: Option<f64>,
}

pub(crate) fn parse_price(body: &str, asset: &AssetKey) -> Result<Decimal, SourceError> {
    let resp: PumpPrice = parse_json(PROVIDER, body)?;
    match resp.price {
        Some(value) => to_price(PROVIDER, value),
        None => Err(SourceError::NotFound {
            provider: PROVIDER,
            asset: asset.to_string(),
        }),
    }
}

pub struct PumpFunSource {
    http: Client,
}

impl PumpFunSource {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: http_client(PROVIDER)?,
        })
    }
}

#[async_trait]
impl SourceAdapter for PumpFunSource {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn fetch(&self, asset: &AssetKey, timeout: Duration) -> Result<Decimal, SourceError> {
        let url = format!("{BASE_URL}/{}/price", urlencoding::encode(asset.as_str()));
        let body = send(PROVIDER, self.http.get(&url), timeout).await?;
        parse_price(&body, asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_price() {
        let key = AssetKey::new("PumpMint").unwrap();
        assert_eq!(parse_price(r#"{"price":0.0031}"#, &key).unwrap(), dec!(0.0031));
        assert!(matches!(
            parse_price(r#"{"mint":"PumpMint"}"#, &key),
            Err(SourceError::NotFound { .. })
        ));
        assert!(parse_price(r#"{"price":0}"#, &key).is_err());
    }
}
