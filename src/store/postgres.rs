//! PostgreSQL store backend.
//!
//! Tables are created by [`crate::schema::create_schema`]. The
//! `uq_alerts_active_condition` partial unique index makes the
//! one-active-alert rule hold even across processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{AlertStore, ReadingStore, StationStore, StoreError};
use crate::models::{
    placeholder_code, Acknowledgement, ActiveAlert, Alert, NewAlert, Reading, Station,
};

// ---

const ALERT_COLUMNS: &str = "id, station_id, condition_key, condition_title, severity, \
                             description, active, attended, created_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Row shape of the `alerts` table; `severity` is stored as text.
#[derive(Debug, sqlx::FromRow)]
struct AlertRow {
    // ---
    id: i32,
    station_id: i32,
    condition_key: String,
    condition_title: String,
    severity: String,
    description: String,
    active: bool,
    attended: bool,
    created_at: DateTime<Utc>,
}

/// An `alerts` row joined with its station's name.
#[derive(Debug, sqlx::FromRow)]
struct ActiveAlertRow {
    // ---
    #[sqlx(flatten)]
    alert: AlertRow,
    station_name: Option<String>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = StoreError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        // ---
        let severity = row
            .severity
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("alert {}: {}", row.id, e)))?;

        Ok(Alert {
            id: row.id,
            station_id: row.station_id,
            condition_key: row.condition_key,
            condition_title: row.condition_title,
            severity,
            description: row.description,
            active: row.active,
            attended: row.attended,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl ReadingStore for PgStore {
    async fn append(&self, reading: &Reading) -> Result<(), StoreError> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO readings (
                station_id, temperature, humidity,
                precipitation_rate, flow_rate, recorded_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(reading.station_id)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(reading.precipitation_rate)
        .bind(reading.flow_rate)
        .bind(reading.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_per_station(&self) -> Result<Vec<Reading>, StoreError> {
        // ---
        let rows = sqlx::query_as::<_, Reading>(
            r#"
            SELECT DISTINCT ON (station_id)
                station_id, temperature, humidity,
                precipitation_rate, flow_rate, recorded_at
            FROM readings
            ORDER BY station_id, recorded_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn find_active(
        &self,
        station_id: i32,
        condition_key: &str,
    ) -> Result<Option<Alert>, StoreError> {
        // ---
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM alerts \
             WHERE station_id = $1 AND condition_key = $2 AND active \
             LIMIT 1"
        );
        let row = sqlx::query_as::<_, AlertRow>(&sql)
            .bind(station_id)
            .bind(condition_key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Alert::try_from).transpose()
    }

    async fn create(&self, alert: NewAlert) -> Result<Alert, StoreError> {
        // ---
        // The partial unique index arbitrates concurrent inserts: the loser
        // gets no row back instead of a second active alert.
        let sql = format!(
            "INSERT INTO alerts (station_id, condition_key, condition_title, severity, description) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (station_id, condition_key) WHERE active DO NOTHING \
             RETURNING {ALERT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, AlertRow>(&sql)
            .bind(alert.station_id)
            .bind(&alert.condition_key)
            .bind(&alert.condition_title)
            .bind(alert.severity.as_str())
            .bind(&alert.description)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Alert::try_from(row),
            None => Err(StoreError::DuplicateActive {
                station_id: alert.station_id,
                condition_key: alert.condition_key,
            }),
        }
    }

    async fn set_attended(&self, alert_id: i32) -> Result<Acknowledgement, StoreError> {
        // ---
        let mut tx = self.pool.begin().await?;

        let select = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = $1 FOR UPDATE");
        let current = sqlx::query_as::<_, AlertRow>(&select)
            .bind(alert_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "alert",
                id: alert_id,
            })?;

        if current.attended && !current.active {
            tx.commit().await?;
            return Ok(Acknowledgement::AlreadyAttended(Alert::try_from(current)?));
        }

        let update = format!(
            "UPDATE alerts SET active = FALSE, attended = TRUE, updated_at = NOW() \
             WHERE id = $1 RETURNING {ALERT_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, AlertRow>(&update)
            .bind(alert_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Acknowledgement::Attended(Alert::try_from(updated)?))
    }

    async fn list_active(&self) -> Result<Vec<ActiveAlert>, StoreError> {
        // ---
        let rows = sqlx::query_as::<_, ActiveAlertRow>(
            r#"
            SELECT
                a.id, a.station_id, a.condition_key, a.condition_title, a.severity,
                a.description, a.active, a.attended, a.created_at,
                s.name AS station_name
            FROM alerts a
            LEFT JOIN stations s ON s.id = a.station_id
            WHERE a.active
            ORDER BY a.created_at DESC, a.id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ActiveAlert {
                    alert: Alert::try_from(row.alert)?,
                    station_name: row.station_name,
                })
            })
            .collect()
    }
}

#[async_trait]
impl StationStore for PgStore {
    async fn list_stations(&self) -> Result<Vec<Station>, StoreError> {
        // ---
        let rows = sqlx::query_as::<_, Station>(
            r#"
            SELECT id, code, name, location, latitude, longitude
            FROM stations
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn ensure_station(&self, station_id: i32) -> Result<bool, StoreError> {
        // ---
        let inserted = sqlx::query(
            r#"
            INSERT INTO stations (id, code, name)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(station_id)
        .bind(placeholder_code(station_id))
        .bind(format!("Station {station_id}"))
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        if inserted {
            // Keep SERIAL ahead of the explicitly inserted id
            sqlx::query(
                r#"
                SELECT setval(
                    pg_get_serial_sequence('stations', 'id'),
                    GREATEST((SELECT MAX(id) FROM stations), 1)
                )
                "#,
            )
            .execute(&self.pool)
            .await?;
        }

        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::Severity;

    fn create_test_row(severity: &str) -> AlertRow {
        // ---
        AlertRow {
            id: 5,
            station_id: 1,
            condition_key: "precipitation_rate".to_string(),
            condition_title: "Precipitation rate: Warning".to_string(),
            severity: severity.to_string(),
            description: "Precipitation rate of 800 mm/h recorded.".to_string(),
            active: true,
            attended: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_alert_row_decodes_severity() {
        // ---
        let alert = Alert::try_from(create_test_row("warning")).unwrap();
        assert_eq!(alert.severity, Severity::Warning);
        assert_eq!(alert.condition_key, "precipitation_rate");
    }

    #[test]
    fn test_alert_row_with_unknown_severity_is_corrupt() {
        // ---
        let err = Alert::try_from(create_test_row("catastrophic")).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(msg) if msg.contains("alert 5")));
    }
}
