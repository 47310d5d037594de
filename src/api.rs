//! HTTP API for creating swaps and following their progress
//!
//! Endpoints:
//! - POST /swaps/create - Create a swap
//! - POST /swaps/assign - Attach the user's source transaction
//! - GET /swaps/info/{uuid} - One swap
//! - GET /swaps/latest - Most recent swaps
//! - GET /swaps/fee - Quote the mint fee
//! - GET /health - Liveness
//! - GET /metrics - Prometheus metrics

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::db::Swap;
use crate::metrics;
use crate::swaps::{AttachOutcome, SwapService};
use crate::types::Direction;
use crate::units::is_hex_address;

/// Rows returned by /swaps/latest
const LATEST_LIMIT: i64 = 50;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SwapService>,
    pub min_swap: BigDecimal,
}

#[derive(Debug, Serialize)]
struct ResultEnvelope<T> {
    result: T,
}

fn ok<T: Serialize>(result: T) -> Response {
    (StatusCode::OK, Json(ResultEnvelope { result })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    #[serde(rename = "type")]
    pub kind: i64,
    pub amount: BigDecimal,
    pub address: String,
}

#[derive(Debug, Serialize)]
struct CreateResponse {
    uuid: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub uuid: String,
    pub tx: String,
}

#[derive(Debug, Deserialize)]
pub struct FeeQuery {
    pub address: String,
    pub amount: BigDecimal,
}

#[derive(Debug, Serialize)]
struct FeeResponse {
    fee: BigDecimal,
}

/// Public view of a swap
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapView {
    pub uuid: Uuid,
    #[serde(rename = "type")]
    pub kind: i16,
    pub address: String,
    pub amount: BigDecimal,
    pub source_tx: Option<String>,
    pub dest_tx: Option<String>,
    pub status: String,
    pub mined_phase: String,
    pub fail_reason: Option<String>,
    pub fees: Option<BigDecimal>,
    pub time: DateTime<Utc>,
}

impl From<&Swap> for SwapView {
    fn from(swap: &Swap) -> Self {
        Self {
            uuid: swap.id,
            kind: swap.direction.code(),
            address: swap.address.clone(),
            amount: swap.amount.clone(),
            source_tx: swap.source_tx.clone(),
            dest_tx: swap.dest_tx.clone(),
            status: swap.status.as_str().to_string(),
            mined_phase: swap.mined_phase.as_str().to_string(),
            fail_reason: swap.fail_reason.clone(),
            fees: swap.fees.clone(),
            time: swap.created_at,
        }
    }
}

/// Row of /swaps/latest
#[derive(Debug, Serialize)]
pub struct SwapSummary {
    pub address: String,
    #[serde(rename = "type")]
    pub kind: i16,
    pub amount: BigDecimal,
    pub status: String,
    pub time: DateTime<Utc>,
}

impl From<&Swap> for SwapSummary {
    fn from(swap: &Swap) -> Self {
        Self {
            address: swap.address.clone(),
            kind: swap.direction.code(),
            amount: swap.amount.clone(),
            status: swap.status.as_str().to_string(),
            time: swap.created_at,
        }
    }
}

fn internal_error(context: &str, e: eyre::Report) -> Response {
    metrics::record_error("api");
    error!(error = %e, "{}", context);
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

async fn create_swap(State(state): State<AppState>, Json(req): Json<CreateRequest>) -> Response {
    let Some(direction) = Direction::from_code(req.kind) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if !is_hex_address(&req.address) {
        return StatusCode::BAD_REQUEST.into_response();
    }
    // Two decimals, rounded down
    let amount = req.amount.with_scale(2);
    if amount < state.min_swap {
        return StatusCode::BAD_REQUEST.into_response();
    }

    match state
        .service
        .create_swap(direction, &req.address, amount)
        .await
    {
        Ok(swap) => ok(CreateResponse { uuid: swap.id }),
        Err(e) => internal_error("Failed to create swap", e),
    }
}

async fn assign_tx(State(state): State<AppState>, Json(req): Json<AssignRequest>) -> Response {
    let Ok(id) = Uuid::parse_str(&req.uuid) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match state.service.attach_source_tx(id, &req.tx).await {
        Ok(AttachOutcome::Accepted) => StatusCode::OK.into_response(),
        Ok(AttachOutcome::Rejected(reason)) => {
            (StatusCode::BAD_REQUEST, reason.to_string()).into_response()
        }
        Err(e) => internal_error("Failed to attach source tx", e),
    }
}

async fn swap_info(State(state): State<AppState>, Path(uuid): Path<String>) -> Response {
    let Ok(id) = Uuid::parse_str(&uuid) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match state.service.get_swap(id).await {
        Ok(Some(swap)) => ok(SwapView::from(&swap)),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error("Failed to load swap", e),
    }
}

async fn latest_swaps(State(state): State<AppState>) -> Response {
    match state.service.latest_swaps(LATEST_LIMIT).await {
        Ok(swaps) => ok(swaps.iter().map(SwapSummary::from).collect::<Vec<_>>()),
        Err(e) => internal_error("Failed to list swaps", e),
    }
}

async fn fee_quote(State(state): State<AppState>, Query(query): Query<FeeQuery>) -> Response {
    if !is_hex_address(&query.address) || query.amount <= BigDecimal::from(0) {
        return StatusCode::BAD_REQUEST.into_response();
    }

    match state
        .service
        .calculate_fee(&query.address, &query.amount)
        .await
    {
        Ok(Some(fee)) => ok(FeeResponse { fee }),
        Ok(None) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        Err(e) => internal_error("Failed to quote fee", e),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn prometheus_metrics() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_text(),
    )
        .into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/swaps/create", post(create_swap))
        .route("/swaps/assign", post(assign_tx))
        .route("/swaps/info/{uuid}", get(swap_info))
        .route("/swaps/latest", get(latest_swaps))
        .route("/swaps/fee", get(fee_quote))
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API until the task is dropped
pub async fn start_api_server(addr: SocketAddr, state: AppState) -> eyre::Result<()> {
    let app = router(state);

    info!("API server listening on {}", addr);
    metrics::UP.set(1.0);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
