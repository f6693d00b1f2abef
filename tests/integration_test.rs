//! Live checks against a running service at `BASE_URL`.
//!
//! Run with `cargo test -- --ignored` once the service is up.

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Station {
    id: i32,
    code: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct Alert {
    id: i32,
    station_id: i32,
    condition_key: String,
    condition_title: String,
    severity: String,
    active: bool,
    attended: bool,
    station_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Reading {
    station_id: i32,
    flow_rate: f64,
    precipitation_rate: f64,
    recorded_at: DateTime<Utc>,
}

fn base_url() -> String {
    std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8080".into())
}

#[tokio::test]
#[ignore = "requires a running service at BASE_URL"]
async fn health_is_ok() -> Result<()> {
    // ---
    let body: serde_json::Value = Client::new()
        .get(format!("{}/health", base_url()))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running service at BASE_URL"]
async fn default_station_is_listed() -> Result<()> {
    // ---
    let stations: Vec<Station> = Client::new()
        .get(format!("{}/api/stations", base_url()))
        .send()
        .await?
        .json()
        .await?;

    assert!(!stations.is_empty(), "No stations returned");
    for s in &stations {
        assert!(s.id > 0, "station id should be positive");
        assert!(!s.code.is_empty(), "station code should not be empty");
        assert!(!s.name.is_empty(), "station name should not be empty");
    }
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running service at BASE_URL"]
async fn active_alerts_are_consistent() -> Result<()> {
    // ---
    let alerts: Vec<Alert> = Client::new()
        .get(format!("{}/api/alerts/active", base_url()))
        .send()
        .await?
        .json()
        .await?;

    let mut seen = std::collections::HashSet::new();
    for a in &alerts {
        assert!(a.active && !a.attended, "alert {} listed as active but is not", a.id);
        assert!(
            ["informative", "warning", "critical"].contains(&a.severity.as_str()),
            "unexpected severity {}",
            a.severity
        );
        assert!(!a.condition_title.is_empty());
        assert!(
            a.station_name.as_deref().is_some_and(|n| !n.is_empty()),
            "alert {} has no station name",
            a.id
        );
        assert!(
            seen.insert((a.station_id, a.condition_key.clone())),
            "two active alerts for station {} / {}",
            a.station_id,
            a.condition_key
        );
    }
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running service at BASE_URL"]
async fn latest_readings_one_per_station() -> Result<()> {
    // ---
    let readings: Vec<Reading> = Client::new()
        .get(format!("{}/api/readings/latest", base_url()))
        .send()
        .await?
        .json()
        .await?;

    let mut stations: Vec<i32> = readings.iter().map(|r| r.station_id).collect();
    stations.dedup();
    assert_eq!(stations.len(), readings.len(), "more than one reading per station");

    for r in &readings {
        assert!(r.flow_rate.is_finite() && r.precipitation_rate.is_finite());
        assert!(r.recorded_at > DateTime::from_timestamp(0, 0).unwrap());
    }
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running service at BASE_URL"]
async fn attending_unknown_alert_is_not_found() -> Result<()> {
    // ---
    let response = Client::new()
        .put(format!("{}/api/alerts/{}/attend", base_url(), i32::MAX))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["code"], "NOT_FOUND");
    Ok(())
}
