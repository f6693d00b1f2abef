//! Telemetry transport: NATS subscription and per-station dispatch.
//!
//! [`run`] subscribes to the configured subjects and hands every message to
//! a [`StationDispatcher`]. The dispatcher keeps one bounded queue and one
//! worker task per station, so a station's messages are processed in arrival
//! order while different stations proceed concurrently. A worker that sits
//! idle for [`DEFAULT_IDLE_TIMEOUT`] retires and its queue is reclaimed.

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::pipeline::Pipeline;

// ---

/// How long a station worker waits for its next message before retiring.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// One message waiting in a station queue.
struct Envelope {
    subject: String,
    payload: Vec<u8>,
}

/// Routes messages to per-station worker tasks.
pub struct StationDispatcher {
    pipeline: Arc<Pipeline>,
    queues: Mutex<HashMap<i32, mpsc::Sender<Envelope>>>,
    depth: usize,
    idle_timeout: Duration,
}

impl StationDispatcher {
    // ---
    pub fn new(pipeline: Arc<Pipeline>, depth: usize) -> Self {
        Self {
            pipeline,
            queues: Mutex::new(HashMap::new()),
            depth,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Queue a message for its station's worker.
    ///
    /// Returns `false` when the station's queue is full and the message was
    /// dropped. Ingestion is at-most-once; a burst from one station never
    /// blocks the others.
    pub async fn dispatch(&self, subject: String, payload: Vec<u8>) -> bool {
        // ---
        let station_id = self.pipeline.bind_station(&subject);
        let mut queues = self.queues.lock().await;

        let mut envelope = Envelope { subject, payload };
        for _ in 0..2 {
            let sender = match queues.get(&station_id) {
                Some(sender) => sender.clone(),
                None => {
                    // Reclaim queues of workers that retired while idle.
                    queues.retain(|_, sender| !sender.is_closed());
                    let sender = self.spawn_worker(station_id);
                    queues.insert(station_id, sender.clone());
                    sender
                }
            };

            match sender.try_send(envelope) {
                Ok(()) => return true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(station_id, depth = self.depth, "Station queue full, dropping message");
                    return false;
                }
                Err(mpsc::error::TrySendError::Closed(returned)) => {
                    // Worker retired or died; replace it and retry once.
                    debug!(station_id, "Station worker gone, restarting");
                    queues.remove(&station_id);
                    envelope = returned;
                }
            }
        }

        error!(station_id, "Could not hand message to a station worker");
        false
    }

    /// Number of stations holding a worker queue.
    pub async fn station_count(&self) -> usize {
        self.queues.lock().await.len()
    }

    fn spawn_worker(&self, station_id: i32) -> mpsc::Sender<Envelope> {
        // ---
        let (tx, mut rx) = mpsc::channel::<Envelope>(self.depth);
        let pipeline = self.pipeline.clone();
        let idle_timeout = self.idle_timeout;

        tokio::spawn(async move {
            debug!(station_id, "Station worker started");
            loop {
                match tokio::time::timeout(idle_timeout, rx.recv()).await {
                    Ok(Some(envelope)) => run_contained(&pipeline, station_id, envelope).await,
                    Ok(None) => break,
                    Err(_) => {
                        // Refuse new messages, then finish what was queued.
                        rx.close();
                        while let Some(envelope) = rx.recv().await {
                            run_contained(&pipeline, station_id, envelope).await;
                        }
                        debug!(station_id, "Station worker idle, retiring");
                        break;
                    }
                }
            }
            debug!(station_id, "Station worker stopped");
        });

        tx
    }
}

/// Run one message on its own task so a panic is contained; awaiting it
/// here keeps the station's order.
async fn run_contained(pipeline: &Arc<Pipeline>, station_id: i32, envelope: Envelope) {
    // ---
    let pipeline = pipeline.clone();
    let Envelope { subject, payload } = envelope;
    let run = tokio::spawn(async move { pipeline.on_message(&subject, &payload).await });
    if let Err(e) = run.await {
        error!(station_id, "Pipeline run aborted: {}", e);
    }
}

/// Subscribe to `subjects` on the NATS server at `url` and feed `dispatcher`
/// until the subscriptions end.
pub async fn run(url: &str, subjects: &[String], dispatcher: Arc<StationDispatcher>) -> Result<()> {
    // ---
    let client = async_nats::connect(url)
        .await
        .map_err(|e| anyhow!("Failed to connect to NATS at '{}': {}", url, e))?;
    info!("Connected to NATS at {}", url);

    let mut subscriptions = Vec::with_capacity(subjects.len());
    for subject in subjects {
        let sub = client
            .subscribe(subject.clone())
            .await
            .map_err(|e| anyhow!("Failed to subscribe to '{}': {}", subject, e))?;
        info!("Subscribed to {}", subject);
        subscriptions.push(sub);
    }

    let mut messages = futures_util::stream::select_all(subscriptions);
    while let Some(message) = messages.next().await {
        dispatcher
            .dispatch(message.subject.to_string(), message.payload.to_vec())
            .await;
    }

    warn!("All telemetry subscriptions closed");
    Ok(())
}
