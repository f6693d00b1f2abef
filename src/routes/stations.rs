use axum::{extract::State, routing::get, Json, Router};
use tracing::info;

use super::{ApiResult, AppState};
use crate::models::{Reading, Station};
use crate::store::with_timeout;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/stations", get(list_stations))
        .route("/api/readings/latest", get(latest_readings))
}

async fn list_stations(State(state): State<AppState>) -> ApiResult<Json<Vec<Station>>> {
    // ---
    let stations = with_timeout(state.store_timeout, state.stores.stations.list_stations()).await?;
    info!("GET /api/stations - {} stations", stations.len());
    Ok(Json(stations))
}

/// Most recent reading of every station.
async fn latest_readings(State(state): State<AppState>) -> ApiResult<Json<Vec<Reading>>> {
    // ---
    let readings =
        with_timeout(state.store_timeout, state.stores.readings.latest_per_station()).await?;
    info!("GET /api/readings/latest - {} stations reporting", readings.len());
    Ok(Json(readings))
}
