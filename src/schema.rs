//! Database schema management for `codemetal-sensorwatch`.
//!
//! Ensures required tables and indexes exist before ingesting telemetry.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates the `stations`, `readings` and `alerts` tables, the partial
/// unique index that allows one active alert per station and condition,
/// and registers the default station when it is missing. Safe to call on
/// every startup.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool, default_station_id: i32) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stations (
            id          SERIAL PRIMARY KEY,
            code        TEXT        NOT NULL UNIQUE,
            name        TEXT        NOT NULL,
            location    TEXT,
            latitude    DOUBLE PRECISION,
            longitude   DOUBLE PRECISION,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Append-only telemetry history
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readings (
            id                 BIGSERIAL PRIMARY KEY,
            station_id         INTEGER     NOT NULL REFERENCES stations (id) ON DELETE CASCADE,
            temperature        DOUBLE PRECISION NOT NULL,
            humidity           DOUBLE PRECISION NOT NULL,
            precipitation_rate DOUBLE PRECISION NOT NULL,
            flow_rate          DOUBLE PRECISION NOT NULL,
            recorded_at        TIMESTAMPTZ NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id              SERIAL PRIMARY KEY,
            station_id      INTEGER     NOT NULL REFERENCES stations (id) ON DELETE CASCADE,
            condition_key   TEXT        NOT NULL,
            condition_title TEXT        NOT NULL,
            severity        TEXT        NOT NULL DEFAULT 'informative'
                            CHECK (severity IN ('informative', 'warning', 'critical')),
            description     TEXT        NOT NULL DEFAULT '',
            active          BOOLEAN     NOT NULL DEFAULT TRUE,
            attended        BOOLEAN     NOT NULL DEFAULT FALSE,
            created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // At most one active alert per station and condition
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS uq_alerts_active_condition
            ON alerts (station_id, condition_key)
            WHERE active;
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_readings_station_recorded
            ON readings (station_id, recorded_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Messages without a station in their subject land here
    sqlx::query(
        r#"
        INSERT INTO stations (id, code, name, location)
        VALUES ($1, 'esp32-01', 'Station 1', 'Default')
        ON CONFLICT DO NOTHING;
        "#,
    )
    .bind(default_station_id)
    .execute(&mut *tx)
    .await?;

    // Keep SERIAL ahead of the explicitly inserted id
    sqlx::query(
        r#"
        SELECT setval(
            pg_get_serial_sequence('stations', 'id'),
            GREATEST((SELECT MAX(id) FROM stations), 1)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
