use std::{sync::Arc, time::Duration};

use axum::Router;

use crate::broadcast::Broadcaster;
use crate::committer::AlertCommitter;
use crate::store::Stores;

mod alerts;
mod error;
mod health;
mod live;
mod stations;

pub use error::{ApiError, ApiResult};

// ---

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    // ---
    pub stores: Stores,
    pub committer: Arc<AlertCommitter>,
    pub broadcaster: Arc<Broadcaster>,
    pub store_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(stations::router())
        .merge(alerts::router())
        .merge(live::router())
        .merge(health::router())
        .with_state(state)
}
