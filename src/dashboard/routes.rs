//! Stats server route handlers.
//!
//! All endpoints return JSON. State is the shared `Arc<PriceOracle>`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::engine::{CacheStats, PriceOracle};
use crate::types::{AssetKey, ConsumerRole};

pub type AppState = Arc<PriceOracle>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct PriceQuery {
    #[serde(default)]
    pub role: ConsumerRole,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceResponse {
    pub asset: String,
    pub price: Option<Decimal>,
    pub success: bool,
    pub reason: Option<String>,
    pub retry_after_secs: Option<u64>,
    pub force_sell_eligible: bool,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/stats
pub async fn get_stats(State(oracle): State<AppState>) -> Json<CacheStats> {
    Json(oracle.cache_stats())
}

/// GET /api/price/:asset?role=risk|copybot|general
pub async fn get_price(
    State(oracle): State<AppState>,
    Path(asset): Path<String>,
    Query(query): Query<PriceQuery>,
) -> Result<Json<PriceResponse>, (StatusCode, String)> {
    let key = AssetKey::new(asset).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let result = oracle.get_price_with_force_sell_info(&key, query.role).await;

    Ok(Json(PriceResponse {
        asset: key.to_string(),
        price: result.price,
        success: result.success,
        reason: result.reason(),
        retry_after_secs: result.retry_after.map(|d| d.as_secs()),
        force_sell_eligible: result.force_sell_eligible,
    }))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}
