//! Data models shared by the ingestion pipeline, the stores and the API.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---

/// One normalized telemetry sample from a station.
///
/// Created once per inbound message and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reading {
    // ---
    pub station_id: i32,
    pub temperature: f64,
    pub humidity: f64,
    pub precipitation_rate: f64,
    pub flow_rate: f64,
    pub recorded_at: DateTime<Utc>,
}

/// A physical sensing location registered in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Station {
    // ---
    pub id: i32,
    pub code: String,
    pub name: String,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Station {
    // ---
    /// Station registered on first sight of its id, before anyone names it.
    pub fn placeholder(id: i32) -> Self {
        Self {
            id,
            code: placeholder_code(id),
            name: format!("Station {id}"),
            location: None,
            latitude: None,
            longitude: None,
        }
    }
}

/// Code given to a station registered on first sight.
pub fn placeholder_code(id: i32) -> String {
    format!("station-{id}")
}

/// Alert severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Informative,
    Warning,
    Critical,
}

impl Severity {
    // ---
    /// Value stored in the `alerts.severity` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Informative => "informative",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    /// Human-readable label used in alert titles.
    pub fn label(self) -> &'static str {
        match self {
            Severity::Informative => "Informative",
            Severity::Warning => "Warning",
            Severity::Critical => "Critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown severity '{0}'")]
pub struct UnknownSeverity(pub String);

impl FromStr for Severity {
    type Err = UnknownSeverity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "informative" => Ok(Severity::Informative),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(UnknownSeverity(other.to_string())),
        }
    }
}

/// A detected threshold violation for one station.
///
/// At most one alert with `active == true` exists per
/// `(station_id, condition_key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    // ---
    pub id: i32,
    pub station_id: i32,
    /// Stable identity of the rule that fired, e.g. `flow_rate`.
    pub condition_key: String,
    /// Display title, e.g. "Flow rate: Critical".
    pub condition_title: String,
    pub severity: Severity,
    pub description: String,
    pub active: bool,
    pub attended: bool,
    pub created_at: DateTime<Utc>,
}

/// An active alert as listed for operators, with its station's name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAlert {
    // ---
    #[serde(flatten)]
    pub alert: Alert,
    /// `None` when the station is not in the registry.
    pub station_name: Option<String>,
}

/// Alert data before the store assigns an id and creation time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    // ---
    pub station_id: i32,
    pub condition_key: String,
    pub condition_title: String,
    pub severity: Severity,
    pub description: String,
}

impl NewAlert {
    // ---
    /// Materialize as a freshly created, active and unattended alert.
    pub fn into_alert(self, id: i32, created_at: DateTime<Utc>) -> Alert {
        // ---
        Alert {
            id,
            station_id: self.station_id,
            condition_key: self.condition_key,
            condition_title: self.condition_title,
            severity: self.severity,
            description: self.description,
            active: true,
            attended: false,
            created_at,
        }
    }
}

/// Result of acknowledging an alert.
#[derive(Debug, Clone, PartialEq)]
pub enum Acknowledgement {
    /// The alert was active and is now inactive and attended.
    Attended(Alert),
    /// The alert had already been attended; nothing changed.
    AlreadyAttended(Alert),
}

impl Acknowledgement {
    // ---
    pub fn alert(&self) -> &Alert {
        match self {
            Acknowledgement::Attended(alert) | Acknowledgement::AlreadyAttended(alert) => alert,
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, Acknowledgement::Attended(_))
    }
}
