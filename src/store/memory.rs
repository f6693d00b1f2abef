//! In-process store backend.
//!
//! Keeps everything behind one `RwLock` and enforces the same
//! one-active-alert-per-condition rule as the Postgres partial index.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{AlertStore, ReadingStore, StationStore, StoreError};
use crate::models::{Acknowledgement, ActiveAlert, Alert, NewAlert, Reading, Station};

// ---

#[derive(Default)]
struct Inner {
    stations: Vec<Station>,
    readings: Vec<Reading>,
    alerts: Vec<Alert>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-registered with the given stations.
    pub fn with_stations(stations: Vec<Station>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                stations,
                ..Inner::default()
            }),
        }
    }

    /// Every alert ever created, in creation order.
    pub async fn alerts(&self) -> Vec<Alert> {
        self.inner.read().await.alerts.clone()
    }

    /// Every reading appended, in append order.
    pub async fn readings(&self) -> Vec<Reading> {
        self.inner.read().await.readings.clone()
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn append(&self, reading: &Reading) -> Result<(), StoreError> {
        self.inner.write().await.readings.push(reading.clone());
        Ok(())
    }

    async fn latest_per_station(&self) -> Result<Vec<Reading>, StoreError> {
        // ---
        let inner = self.inner.read().await;
        let mut latest: Vec<Reading> = Vec::new();

        // Later appends win ties on recorded_at, matching `ORDER BY recorded_at DESC, id DESC`.
        for reading in &inner.readings {
            match latest.iter_mut().find(|r| r.station_id == reading.station_id) {
                Some(current) if reading.recorded_at >= current.recorded_at => {
                    *current = reading.clone()
                }
                Some(_) => {}
                None => latest.push(reading.clone()),
            }
        }

        latest.sort_by_key(|r| r.station_id);
        Ok(latest)
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn find_active(
        &self,
        station_id: i32,
        condition_key: &str,
    ) -> Result<Option<Alert>, StoreError> {
        // ---
        let inner = self.inner.read().await;
        Ok(inner
            .alerts
            .iter()
            .find(|a| a.active && a.station_id == station_id && a.condition_key == condition_key)
            .cloned())
    }

    async fn create(&self, alert: NewAlert) -> Result<Alert, StoreError> {
        // ---
        let mut inner = self.inner.write().await;

        let duplicate = inner.alerts.iter().any(|a| {
            a.active && a.station_id == alert.station_id && a.condition_key == alert.condition_key
        });
        if duplicate {
            return Err(StoreError::DuplicateActive {
                station_id: alert.station_id,
                condition_key: alert.condition_key,
            });
        }

        let id = inner.alerts.len() as i32 + 1;
        let created = alert.into_alert(id, Utc::now());
        inner.alerts.push(created.clone());
        Ok(created)
    }

    async fn set_attended(&self, alert_id: i32) -> Result<Acknowledgement, StoreError> {
        // ---
        let mut inner = self.inner.write().await;
        let alert = inner
            .alerts
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or(StoreError::NotFound {
                entity: "alert",
                id: alert_id,
            })?;

        if alert.attended && !alert.active {
            return Ok(Acknowledgement::AlreadyAttended(alert.clone()));
        }

        alert.active = false;
        alert.attended = true;
        Ok(Acknowledgement::Attended(alert.clone()))
    }

    async fn list_active(&self) -> Result<Vec<ActiveAlert>, StoreError> {
        // ---
        let inner = self.inner.read().await;
        let mut active: Vec<ActiveAlert> = inner
            .alerts
            .iter()
            .filter(|a| a.active)
            .map(|a| ActiveAlert {
                alert: a.clone(),
                station_name: inner
                    .stations
                    .iter()
                    .find(|s| s.id == a.station_id)
                    .map(|s| s.name.clone()),
            })
            .collect();
        active.sort_by(|a, b| {
            b.alert
                .created_at
                .cmp(&a.alert.created_at)
                .then(b.alert.id.cmp(&a.alert.id))
        });
        Ok(active)
    }
}

#[async_trait]
impl StationStore for MemoryStore {
    async fn list_stations(&self) -> Result<Vec<Station>, StoreError> {
        Ok(self.inner.read().await.stations.clone())
    }

    async fn ensure_station(&self, station_id: i32) -> Result<bool, StoreError> {
        // ---
        let mut inner = self.inner.write().await;
        if inner.stations.iter().any(|s| s.id == station_id) {
            return Ok(false);
        }
        inner.stations.push(Station::placeholder(station_id));
        inner.stations.sort_by_key(|s| s.id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::Severity;
    use chrono::{Duration, TimeZone};

    fn new_alert(station_id: i32, key: &str) -> NewAlert {
        // ---
        NewAlert {
            station_id,
            condition_key: key.to_string(),
            condition_title: format!("{key}: Critical"),
            severity: Severity::Critical,
            description: String::new(),
        }
    }

    fn reading_at(station_id: i32, minute: u32, flow_rate: f64) -> Reading {
        // ---
        Reading {
            station_id,
            temperature: 0.0,
            humidity: 0.0,
            precipitation_rate: 0.0,
            flow_rate,
            recorded_at: Utc.with_ymd_and_hms(2025, 10, 21, 12, minute, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_second_active_alert() {
        // ---
        let store = MemoryStore::new();
        store.create(new_alert(1, "flow_rate")).await.unwrap();

        let err = store.create(new_alert(1, "flow_rate")).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::DuplicateActive {
                station_id: 1,
                condition_key: "flow_rate".to_string()
            }
        );

        // Other station and other condition are unaffected.
        store.create(new_alert(2, "flow_rate")).await.unwrap();
        store.create(new_alert(1, "precipitation_rate")).await.unwrap();
        assert_eq!(store.alerts().await.len(), 3);
    }

    #[tokio::test]
    async fn test_attended_alert_frees_the_condition() {
        // ---
        let store = MemoryStore::new();
        let first = store.create(new_alert(1, "flow_rate")).await.unwrap();

        let ack = store.set_attended(first.id).await.unwrap();
        assert!(ack.changed());
        assert!(store.find_active(1, "flow_rate").await.unwrap().is_none());

        let second = store.create(new_alert(1, "flow_rate")).await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_set_attended_is_idempotent() {
        // ---
        let store = MemoryStore::new();
        let alert = store.create(new_alert(1, "flow_rate")).await.unwrap();

        let first = store.set_attended(alert.id).await.unwrap();
        let second = store.set_attended(alert.id).await.unwrap();

        assert!(matches!(first, Acknowledgement::Attended(_)));
        assert!(matches!(second, Acknowledgement::AlreadyAttended(_)));
        assert_eq!(first.alert(), second.alert());
    }

    #[tokio::test]
    async fn test_set_attended_unknown_id() {
        // ---
        let store = MemoryStore::new();
        let err = store.set_attended(99).await.unwrap_err();
        assert_eq!(err, StoreError::NotFound { entity: "alert", id: 99 });
    }

    #[tokio::test]
    async fn test_latest_per_station() {
        // ---
        let store = MemoryStore::new();
        store.append(&reading_at(2, 5, 1.0)).await.unwrap();
        store.append(&reading_at(1, 10, 2.0)).await.unwrap();
        store.append(&reading_at(1, 3, 3.0)).await.unwrap();
        store.append(&reading_at(2, 6, 4.0)).await.unwrap();

        let latest = store.latest_per_station().await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].station_id, 1);
        assert_eq!(latest[0].flow_rate, 2.0);
        assert_eq!(latest[1].station_id, 2);
        assert_eq!(latest[1].flow_rate, 4.0);
    }

    #[tokio::test]
    async fn test_list_active_carries_station_name() {
        // ---
        let store = MemoryStore::with_stations(vec![Station::placeholder(1)]);
        store.create(new_alert(1, "flow_rate")).await.unwrap();
        store.create(new_alert(9, "flow_rate")).await.unwrap();

        let mut active = store.list_active().await.unwrap();
        active.sort_by_key(|a| a.alert.station_id);

        assert_eq!(active[0].station_name.as_deref(), Some("Station 1"));
        assert_eq!(active[1].station_name, None);
    }

    #[tokio::test]
    async fn test_ensure_station_registers_once() {
        // ---
        let store = MemoryStore::with_stations(vec![Station::placeholder(1)]);

        assert!(!store.ensure_station(1).await.unwrap());
        assert!(store.ensure_station(7).await.unwrap());
        assert!(!store.ensure_station(7).await.unwrap());

        let stations = store.list_stations().await.unwrap();
        let ids: Vec<i32> = stations.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 7]);
        assert_eq!(stations[1].code, "station-7");
        assert_eq!(stations[1].name, "Station 7");
    }

    #[tokio::test]
    async fn test_list_active_newest_first() {
        // ---
        let store = MemoryStore::new();
        let a = store.create(new_alert(1, "flow_rate")).await.unwrap();
        let b = store.create(new_alert(2, "flow_rate")).await.unwrap();
        let c = store.create(new_alert(3, "flow_rate")).await.unwrap();
        store.set_attended(b.id).await.unwrap();

        {
            // Force distinct creation times regardless of clock resolution.
            let mut inner = store.inner.write().await;
            inner.alerts[0].created_at = Utc::now() - Duration::minutes(5);
        }

        let ids: Vec<i32> = store.list_active().await.unwrap().iter().map(|x| x.alert.id).collect();
        assert_eq!(ids, vec![c.id, a.id]);
    }
}
