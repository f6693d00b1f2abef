//! Ingestion pipeline: one run per inbound telemetry message.
//!
//! Stages, in order:
//! 1. normalize the payload (failure drops the message)
//! 2. broadcast the reading to live viewers
//! 3. register the station on first sight, then persist the reading
//!    (failure is logged; the run continues)
//! 4. evaluate thresholds
//! 5. commit new alerts through the deduplicating committer
//! 6. broadcast each new alert
//!
//! Every run ends in a [`PipelineOutcome`] that is also logged. Nothing a
//! single message does can fail the caller.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::Utc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::broadcast::Broadcaster;
use crate::committer::AlertCommitter;
use crate::evaluator::Evaluator;
use crate::models::{Alert, Reading};
use crate::normalizer::{normalize, NormalizeError, StationBinding};
use crate::store::{with_timeout, ReadingStore, StationStore};

// ---

/// Terminal state of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// The payload could not be decoded; nothing was broadcast or stored.
    Dropped(NormalizeError),
    Processed(Processed),
}

/// Result of a run whose payload was normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct Processed {
    // ---
    pub reading: Reading,
    /// Whether the reading reached the store.
    pub persisted: bool,
    /// Conditions breached by the reading.
    pub triggered: usize,
    /// Alerts created and broadcast by this run.
    pub alerts: Vec<Alert>,
    /// Breaches absorbed by an already active alert.
    pub suppressed: usize,
    /// Breaches whose alert could not be committed.
    pub failed: usize,
}

/// Extract the station id from a subject such as `stations.7.telemetry`.
///
/// The token right after a `stations` token must be a positive integer.
pub fn station_from_subject(subject: &str) -> Option<i32> {
    // ---
    let mut tokens = subject.split(|c: char| c == '.' || c == '/');
    while let Some(token) = tokens.next() {
        if token == "stations" {
            return tokens
                .next()
                .and_then(|id| id.parse::<i32>().ok())
                .filter(|id| *id > 0);
        }
    }
    None
}

pub struct Pipeline {
    readings: Arc<dyn ReadingStore>,
    stations: Arc<dyn StationStore>,
    /// Stations already registered by this process.
    known_stations: Mutex<HashSet<i32>>,
    committer: Arc<AlertCommitter>,
    broadcaster: Arc<Broadcaster>,
    evaluator: Evaluator,
    default_station_id: i32,
    store_timeout: Duration,
}

impl Pipeline {
    // ---
    pub fn new(
        readings: Arc<dyn ReadingStore>,
        stations: Arc<dyn StationStore>,
        committer: Arc<AlertCommitter>,
        broadcaster: Arc<Broadcaster>,
        evaluator: Evaluator,
        default_station_id: i32,
        store_timeout: Duration,
    ) -> Self {
        Self {
            readings,
            stations,
            known_stations: Mutex::new(HashSet::new()),
            committer,
            broadcaster,
            evaluator,
            default_station_id,
            store_timeout,
        }
    }

    /// Station a message on `subject` belongs to.
    pub fn bind_station(&self, subject: &str) -> i32 {
        station_from_subject(subject).unwrap_or(self.default_station_id)
    }

    /// Handle one inbound message: bind it to a station, then [`process`](Self::process) it.
    pub async fn on_message(&self, subject: &str, payload: &[u8]) -> PipelineOutcome {
        // ---
        let station_id = self.bind_station(subject);
        self.process(station_id, payload)
            .instrument(info_span!("pipeline", station_id, subject))
            .await
    }

    /// Run every stage for a payload already bound to `station_id`.
    pub async fn process(&self, station_id: i32, payload: &[u8]) -> PipelineOutcome {
        // ---
        let binding = StationBinding {
            station_id,
            received_at: Utc::now(),
        };

        // Step 1: normalize
        let normalized = match normalize(payload, binding) {
            Ok(n) => n,
            Err(e) => {
                warn!(station_id, bytes = payload.len(), "Dropping message: {}", e);
                return PipelineOutcome::Dropped(e);
            }
        };
        for field in &normalized.defaulted {
            warn!(
                station_id,
                field = field.name(),
                "Field missing or not numeric, recorded as 0.0"
            );
        }
        let reading = normalized.reading;

        // Step 2: live viewers first, even if storage fails below
        let viewers = self.broadcaster.reading(&reading);
        debug!(station_id, viewers, "Reading broadcast");

        // Step 3: persist, registering the station first so both the reading
        // and any alert below have a station row to point at
        self.register_station(station_id).await;
        let persisted = match with_timeout(self.store_timeout, self.readings.append(&reading)).await
        {
            Ok(()) => true,
            Err(e) => {
                error!(station_id, "Failed to store reading, continuing: {}", e);
                false
            }
        };

        // Step 4: evaluate
        let triggered = self.evaluator.evaluate(&reading);

        // Steps 5 and 6: commit and announce new alerts
        let commit = if triggered.is_empty() {
            Default::default()
        } else {
            self.committer.commit_if_new(station_id, &triggered).await
        };
        for alert in &commit.created {
            self.broadcaster.alert_created(alert);
        }

        let processed = Processed {
            reading,
            persisted,
            triggered: triggered.len(),
            alerts: commit.created,
            suppressed: commit.suppressed,
            failed: commit.failed,
        };
        debug!(
            station_id,
            persisted = processed.persisted,
            triggered = processed.triggered,
            created = processed.alerts.len(),
            suppressed = processed.suppressed,
            failed = processed.failed,
            "Pipeline complete"
        );

        PipelineOutcome::Processed(processed)
    }

    /// Make sure `station_id` exists in the station registry.
    ///
    /// Failure is logged and retried on the next message from the station.
    async fn register_station(&self, station_id: i32) {
        // ---
        if self.is_known(station_id) {
            return;
        }
        match with_timeout(self.store_timeout, self.stations.ensure_station(station_id)).await {
            Ok(created) => {
                if created {
                    info!(station_id, "New station registered");
                }
                if let Ok(mut known) = self.known_stations.lock() {
                    known.insert(station_id);
                }
            }
            Err(e) => error!(station_id, "Failed to register station, continuing: {}", e),
        }
    }

    fn is_known(&self, station_id: i32) -> bool {
        self.known_stations
            .lock()
            .map(|known| known.contains(&station_id))
            .unwrap_or(false)
    }
}
