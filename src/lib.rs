//! Sensor telemetry ingestion, threshold alerting and live fan-out.
//!
//! A telemetry message flows one way through the crate:
//! [`normalizer`] → [`broadcast`] (reading) → [`store`] → [`evaluator`] →
//! [`committer`] → [`broadcast`] (alert), orchestrated by [`pipeline`] and
//! fed by [`ingest`]. The binary in `main.rs` wires these together with the
//! administrative HTTP surface in [`routes`].

pub mod broadcast;
pub mod committer;
pub mod config;
pub mod evaluator;
pub mod ingest;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod routes;
pub mod schema;
pub mod store;

pub use config::Config;
pub use models::{Acknowledgement, Alert, NewAlert, Reading, Severity, Station};
