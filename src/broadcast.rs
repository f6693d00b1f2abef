//! Live fan-out of readings and alerts to connected viewers.
//!
//! [`Broadcaster`] wraps a bounded `tokio::sync::broadcast` channel. Sending
//! never waits on receivers: a viewer that falls behind loses the oldest
//! events (it sees `RecvError::Lagged`) and nobody else is slowed down.
//! There is no backlog for subscribers that join later.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{Alert, Reading};

// ---

/// Event pushed to live viewers, serialized as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum LiveEvent {
    #[serde(rename = "sensor:data")]
    Reading(Reading),

    #[serde(rename = "alert:new")]
    AlertCreated(Alert),

    #[serde(rename = "alert:updated")]
    AlertUpdated(Alert),
}

impl LiveEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LiveEvent::Reading(_) => "sensor:data",
            LiveEvent::AlertCreated(_) => "alert:new",
            LiveEvent::AlertUpdated(_) => "alert:updated",
        }
    }
}

/// Default buffer capacity per subscriber.
pub const DEFAULT_CAPACITY: usize = 1024;

pub struct Broadcaster {
    sender: broadcast::Sender<LiveEvent>,
}

impl Broadcaster {
    // ---
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to every current subscriber; returns how many were reached.
    pub fn publish(&self, event: LiveEvent) -> usize {
        // ---
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::trace!(event = name, receivers, "Broadcast");
                receivers
            }
            // Only fails when nobody is listening.
            Err(_) => 0,
        }
    }

    pub fn reading(&self, reading: &Reading) -> usize {
        self.publish(LiveEvent::Reading(reading.clone()))
    }

    pub fn alert_created(&self, alert: &Alert) -> usize {
        self.publish(LiveEvent::AlertCreated(alert.clone()))
    }

    pub fn alert_updated(&self, alert: &Alert) -> usize {
        self.publish(LiveEvent::AlertUpdated(alert.clone()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{TimeZone, Utc};
    use tokio::sync::broadcast::error::RecvError;

    fn create_test_reading(flow_rate: f64) -> Reading {
        // ---
        Reading {
            station_id: 1,
            temperature: 24.5,
            humidity: 70.0,
            precipitation_rate: 2.0,
            flow_rate,
            recorded_at: Utc.with_ymd_and_hms(2025, 10, 21, 4, 10, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        // ---
        let bus = Broadcaster::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.reading(&create_test_reading(1.0)), 2);

        assert_eq!(rx1.recv().await.unwrap(), LiveEvent::Reading(create_test_reading(1.0)));
        assert_eq!(rx2.recv().await.unwrap(), LiveEvent::Reading(create_test_reading(1.0)));
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        // ---
        let bus = Broadcaster::default();
        assert_eq!(bus.reading(&create_test_reading(1.0)), 0);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_backlog() {
        // ---
        let bus = Broadcaster::default();
        let _early = bus.subscribe();
        bus.reading(&create_test_reading(1.0));

        let mut late = bus.subscribe();
        bus.reading(&create_test_reading(2.0));

        assert_eq!(late.recv().await.unwrap(), LiveEvent::Reading(create_test_reading(2.0)));
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_without_blocking() {
        // ---
        let bus = Broadcaster::new(2);
        let mut slow = bus.subscribe();

        for i in 0..5 {
            bus.reading(&create_test_reading(i as f64));
        }

        assert!(matches!(slow.recv().await, Err(RecvError::Lagged(3))));
        assert_eq!(slow.recv().await.unwrap(), LiveEvent::Reading(create_test_reading(3.0)));
    }

    #[test]
    fn test_wire_format() {
        // ---
        let json = serde_json::to_value(LiveEvent::Reading(create_test_reading(5.2))).unwrap();

        assert_eq!(json["event"], "sensor:data");
        assert_eq!(json["data"]["station_id"], 1);
        assert_eq!(json["data"]["flow_rate"], 5.2);
    }
}
