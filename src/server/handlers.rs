use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use super::{ApiError, AppState};
use crate::execution::{ProcessorSnapshot, TradingParams};
use crate::feed::FeedStatus;

#[derive(Debug, Serialize)]
pub struct Ack {
    pub ok: bool,
    pub message: String,
}

impl Ack {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            ok: true,
            message: message.into(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub feed: FeedStatus,
    pub params: TradingParams,
    pub processor: ProcessorSnapshot,
}

fn pair_name(pair: &str) -> Result<String, ApiError> {
    let pair = pair.trim();
    if pair.is_empty() {
        return Err(ApiError::bad_request("pair must not be empty"));
    }
    Ok(pair.to_uppercase())
}

pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Path(pair): Path<String>,
) -> Result<Json<Ack>, ApiError> {
    let pair = pair_name(&pair)?;
    state.feed.subscribe(&pair).await?;
    Ok(Ack::new(format!("subscribed to {}", pair)))
}

pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    Path(pair): Path<String>,
) -> Result<Json<Ack>, ApiError> {
    let pair = pair_name(&pair)?;
    state.feed.unsubscribe(&pair).await?;
    Ok(Ack::new(format!("unsubscribed from {}", pair)))
}

pub async fn set_quantity(
    State(state): State<Arc<AppState>>,
    Path(value): Path<String>,
) -> Result<Json<TradingParams>, ApiError> {
    let quantity: u32 = value
        .parse()
        .map_err(|_| ApiError::bad_request(format!("invalid quantity '{}'", value)))?;
    Ok(Json(state.params.set_quantity(quantity)?))
}

pub async fn set_multiplier(
    State(state): State<Arc<AppState>>,
    Path(value): Path<String>,
) -> Result<Json<TradingParams>, ApiError> {
    let multiplier: f64 = value
        .parse()
        .map_err(|_| ApiError::bad_request(format!("invalid multiplier '{}'", value)))?;
    Ok(Json(state.params.set_multiplier(multiplier)?))
}

pub async fn shutdown(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Ack>) {
    tracing::warn!("Shutdown requested over admin API");
    state.shutdown.trigger();
    (StatusCode::ACCEPTED, Ack::new("shutting down"))
}

pub async fn status(State(state): State<Arc<AppState>>) -> Result<Json<StatusReport>, ApiError> {
    let feed = state.feed.status().await?;
    let processor = state.snapshots.borrow().clone();

    Ok(Json(StatusReport {
        feed,
        params: state.params.load(),
        processor,
    }))
}
