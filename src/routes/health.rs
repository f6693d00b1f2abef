// src/routes/health.rs
//! Liveness endpoint for the sensorwatch service.
//!
//! `/health` answers without touching the stores or the broker, so it stays
//! green while Postgres or NATS are down; ingestion failures show up in the
//! logs instead. It also reports how many live viewers are connected.
//!
//! EMBP: this file exports only a subrouter; the gateway (`mod.rs`) merges it.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;

/// JSON response body for the `/health` endpoint.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    viewers: usize,
}

/// Handle `GET /health`.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        viewers: state.broadcaster.subscriber_count(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
