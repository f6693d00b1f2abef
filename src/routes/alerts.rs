use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use super::{ApiResult, AppState};
use crate::models::{ActiveAlert, Alert};
use crate::store::with_timeout;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/alerts/active", get(list_active))
        .route("/api/alerts/{id}/attend", put(attend))
}

async fn list_active(State(state): State<AppState>) -> ApiResult<Json<Vec<ActiveAlert>>> {
    // ---
    let alerts = with_timeout(state.store_timeout, state.stores.alerts.list_active()).await?;
    info!("GET /api/alerts/active - {} active", alerts.len());
    Ok(Json(alerts))
}

#[derive(Debug, Serialize)]
struct AttendResponse {
    message: String,
    alert: Alert,
}

/// Acknowledge an alert. Repeating the call is harmless.
async fn attend(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> ApiResult<Json<AttendResponse>> {
    // ---
    let ack = state.committer.acknowledge(id).await?;

    if ack.changed() {
        state.broadcaster.alert_updated(ack.alert());
    }

    let message = if ack.changed() {
        format!("Alert {id} marked as attended")
    } else {
        format!("Alert {id} was already attended")
    };
    info!("PUT /api/alerts/{}/attend - {}", id, message);

    Ok(Json(AttendResponse {
        message,
        alert: ack.alert().clone(),
    }))
}
