//! QuickNode token price add-on.
//!
//! JSON-RPC `qn_getTokenPrice` against the account's private endpoint. The
//! endpoint URL embeds the access token, so it is held as a secret.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{http_client, parse_json, send, str_to_price, to_price, SourceAdapter};
use crate::types::{AssetKey, SourceError};

const PROVIDER: &str = "quicknode";
const METHOD: &str = "qn_getTokenPrice";

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<TokenPrice>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct TokenPrice {
    price: Option<serde_json::Value>,
}

pub(crate) fn parse_token_price(body: &str, asset: &AssetKey) -> Result<Decimal, SourceError> {
    let resp: RpcResponse = parse_json(PROVIDER, body)?;
    if let Some(err) = resp.error {
        return Err(SourceError::InvalidResponse {
            provider: PROVIDER,
            message: format!("rpc error {}: {}", err.code, err.message),
        });
    }
    match resp.result.and_then(|r| r.price) {
        Some(serde_json::Value::Number(n)) => match n.as_f64() {
            Some(v) => to_price(PROVIDER, v),
            None => Err(SourceError::InvalidResponse {
                provider: PROVIDER,
                message: format!("price {n} is not a float"),
            }),
        },
        Some(serde_json::Value::String(s)) => str_to_price(PROVIDER, &s),
        _ => Err(SourceError::NotFound {
            provider: PROVIDER,
            asset: asset.to_string(),
        }),
    }
}

pub struct QuickNodeSource {
    http: Client,
    endpoint: SecretString,
}

impl QuickNodeSource {
    pub fn new(endpoint: String) -> Result<Self> {
        Ok(Self {
            http: http_client(PROVIDER)?,
            endpoint: SecretString::new(endpoint),
        })
    }
}

#[async_trait]
impl SourceAdapter for QuickNodeSource {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn fetch(&self, asset: &AssetKey, timeout: Duration) -> Result<Decimal, SourceError> {
        let endpoint = self.endpoint.expose_secret();
        if endpoint.is_empty() {
            return Err(SourceError::NotConfigured { provider: PROVIDER });
        }
        let payload = json!({
            "jsonrpc": "2.0",
            "id": "price-oracle",
            "method": METHOD,
            "params": { "token": asset.as_str() },
        });
        let request = self.http.post(endpoint.as_str()).json(&payload);
        let body = send(PROVIDER, request, timeout).await?;
        let price = parse_token_price(&body, asset)?;
        debug!(asset = %asset.short(), %price, "QuickNode price");
        Ok(price)
    }
}
