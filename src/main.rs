//! Application entry point for the `codemetal-sensorwatch` service.
//!
//! This binary orchestrates the full startup sequence, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Opening the store backend (PostgreSQL pool + schema, or in-memory)
//! - Building the ingestion pipeline and per-station dispatcher
//! - Subscribing to telemetry on NATS
//! - Mounting the admin API and live stream via the `routes` gateway (EMBP pattern)
//! - Serving until Ctrl-C / SIGTERM, then shutting down gracefully
//!
//! # Environment Variables
//! See [`codemetal_sensorwatch::config::load_from_env`] for the full list.
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AXUM_SPAN_EVENTS` (optional) – span event mode for tracing
use std::{env, net::SocketAddr, sync::Arc};

use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::{anyhow, Result};

use codemetal_sensorwatch::{
    broadcast::Broadcaster,
    committer::AlertCommitter,
    config::{self, Config, StoreBackend},
    evaluator::Evaluator,
    ingest::{self, StationDispatcher},
    models::Station,
    pipeline::Pipeline,
    routes::{self, AppState},
    schema,
    store::{MemoryStore, PgStore, Stores},
};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let stores = open_stores(&cfg).await?;

    let broadcaster = Arc::new(Broadcaster::new(cfg.broadcast_capacity));
    let committer = Arc::new(AlertCommitter::new(stores.alerts.clone(), cfg.store_timeout));
    let pipeline = Arc::new(Pipeline::new(
        stores.readings.clone(),
        stores.stations.clone(),
        committer.clone(),
        broadcaster.clone(),
        Evaluator::default(),
        cfg.default_station_id,
        cfg.store_timeout,
    ));
    let dispatcher = Arc::new(StationDispatcher::new(pipeline, cfg.station_queue_depth));

    // The admin surface keeps serving if the broker is unreachable.
    let nats_url = cfg.nats_url.clone();
    let subjects = cfg.telemetry_subjects.clone();
    let ingest_task = tokio::spawn(async move {
        if let Err(e) = ingest::run(&nats_url, &subjects, dispatcher).await {
            tracing::error!("Telemetry ingestion stopped: {:#}", e);
        }
    });

    // Build app from routes gateway (EMBP)
    let app = routes::router(AppState {
        stores,
        committer,
        broadcaster,
        store_timeout: cfg.store_timeout,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ingest_task.abort();
    tracing::info!("Shutdown complete");
    Ok(())
}

// ---

/// Open the configured store backend.
async fn open_stores(cfg: &Config) -> Result<Stores> {
    // ---
    match cfg.store_backend {
        StoreBackend::Postgres => {
            let db_url = cfg
                .db_url
                .as_deref()
                .ok_or_else(|| anyhow!("DATABASE_URL must be set for the postgres backend"))?;

            tracing::info!("Attempting to connect to database");
            let pool = PgPoolOptions::new()
                .max_connections(cfg.db_pool_max)
                .acquire_timeout(cfg.store_timeout)
                .connect(db_url)
                .await
                .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;
            tracing::info!("Successfully connected to database");

            schema::create_schema(&pool, cfg.default_station_id).await?;
            Ok(Stores::from_backend(Arc::new(PgStore::new(pool))))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; nothing survives a restart");
            let default_station = Station {
                id: cfg.default_station_id,
                code: "esp32-01".to_string(),
                name: "Station 1".to_string(),
                location: Some("Default".to_string()),
                latitude: None,
                longitude: None,
            };
            Ok(Stores::from_backend(Arc::new(MemoryStore::with_stations(vec![
                default_station,
            ]))))
        }
    }
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    // ---
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining connections");
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AXUM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `AXUM_LOG_LEVEL` env var
///
/// Called once at startup, before any other logging.
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to AXUM_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,async_nats=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
