//! Storage capabilities consumed by the pipeline and the admin API.
//!
//! The pipeline only sees the traits in this module. Two backends exist:
//! [`PgStore`] for production and [`MemoryStore`] for tests and
//! database-less runs. Every call the pipeline makes goes through
//! [`with_timeout`] so a hung backend turns into [`StoreError::Timeout`].

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Acknowledgement, ActiveAlert, Alert, NewAlert, Reading, Station};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Backend unreachable or the statement failed.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: i32 },

    /// An active alert for this station and condition already exists.
    #[error("active alert '{condition_key}' already exists for station {station_id}")]
    DuplicateActive {
        station_id: i32,
        condition_key: String,
    },

    /// A stored row could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Durable append-only record of readings.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn append(&self, reading: &Reading) -> Result<(), StoreError>;

    /// Most recent reading of every station that has reported.
    async fn latest_per_station(&self) -> Result<Vec<Reading>, StoreError>;
}

/// Alert records and the at-most-one-active rule.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn find_active(
        &self,
        station_id: i32,
        condition_key: &str,
    ) -> Result<Option<Alert>, StoreError>;

    /// Insert a new active alert.
    ///
    /// Fails with [`StoreError::DuplicateActive`] if an active alert for the
    /// same station and condition exists.
    async fn create(&self, alert: NewAlert) -> Result<Alert, StoreError>;

    /// Mark an alert inactive and attended. Idempotent.
    async fn set_attended(&self, alert_id: i32) -> Result<Acknowledgement, StoreError>;

    /// Active alerts with their station names, newest first.
    async fn list_active(&self) -> Result<Vec<ActiveAlert>, StoreError>;
}

#[async_trait]
pub trait StationStore: Send + Sync {
    async fn list_stations(&self) -> Result<Vec<Station>, StoreError>;

    /// Register `station_id` with placeholder code and name unless it exists.
    ///
    /// Returns `true` when the station was created by this call.
    async fn ensure_station(&self, station_id: i32) -> Result<bool, StoreError>;
}

/// Handles to every store capability, cheap to clone.
#[derive(Clone)]
pub struct Stores {
    // ---
    pub readings: Arc<dyn ReadingStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub stations: Arc<dyn StationStore>,
}

impl Stores {
    // ---
    /// Use one backend for every capability.
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: ReadingStore + AlertStore + StationStore + 'static,
    {
        Self {
            readings: backend.clone(),
            alerts: backend.clone(),
            stations: backend,
        }
    }
}

/// Bound a store call; elapsed time becomes [`StoreError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    // ---
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        // ---
        let ok = with_timeout(Duration::from_millis(50), async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(assert_ok!(ok), 7);

        let err = with_timeout(Duration::from_millis(50), async {
            Err::<(), _>(StoreError::Unavailable("down".into()))
        })
        .await;
        assert_eq!(assert_err!(err), StoreError::Unavailable("down".into()));
    }

    #[tokio::test]
    async fn test_with_timeout_bounds_a_hung_call() {
        // ---
        let limit = Duration::from_millis(20);
        let result = with_timeout(limit, async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, StoreError>(())
        })
        .await;

        assert_eq!(result, Err(StoreError::Timeout(limit)));
    }
}
