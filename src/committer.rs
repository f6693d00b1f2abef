//! Deduplicating alert committer.
//!
//! Turns triggered conditions into new alerts while keeping at most one
//! active alert per `(station_id, condition_key)`. The check-then-create
//! sequence runs under a per-key async mutex, and the store's uniqueness
//! rule ([`StoreError::DuplicateActive`]) backs it up across processes.
//!
//! An active alert absorbs every later breach of the same condition,
//! including a move from warning to critical: the existing alert is not
//! escalated and no second alert is raised until it is attended.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::evaluator::Triggered;
use crate::models::{Acknowledgement, Alert};
use crate::store::{with_timeout, AlertStore, StoreError};

// ---

type LockKey = (i32, &'static str);

/// Lazily created async mutex per `(station_id, condition_key)`.
///
/// An entry lives only while some caller holds its `Arc`; idle entries are
/// swept whenever a new key is inserted.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    async fn get(&self, key: LockKey) -> Arc<Mutex<()>> {
        // ---
        let mut locks = self.locks.lock().await;
        if let Some(lock) = locks.get(&key) {
            return lock.clone();
        }
        // Only the map owns an idle lock, and nobody can clone it while we
        // hold the map.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key).or_default().clone()
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

/// What happened to each triggered condition of one reading.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CommitOutcome {
    // ---
    /// Alerts created by this call.
    pub created: Vec<Alert>,
    /// Conditions absorbed by an already-active alert.
    pub suppressed: usize,
    /// Conditions that could not be checked or stored.
    pub failed: usize,
}

pub struct AlertCommitter {
    store: Arc<dyn AlertStore>,
    locks: KeyedLocks,
    timeout: Duration,
}

impl AlertCommitter {
    // ---
    pub fn new(store: Arc<dyn AlertStore>, timeout: Duration) -> Self {
        Self {
            store,
            locks: KeyedLocks::default(),
            timeout,
        }
    }

    /// Create an alert for every triggered condition without an active one.
    ///
    /// Conditions are handled independently; a store failure on one is
    /// logged and counted in [`CommitOutcome::failed`] without affecting
    /// the others.
    pub async fn commit_if_new(&self, station_id: i32, triggered: &[Triggered]) -> CommitOutcome {
        // ---
        let mut outcome = CommitOutcome::default();

        for t in triggered {
            match self.commit_one(station_id, t).await {
                Ok(Some(alert)) => {
                    info!(
                        station_id,
                        alert_id = alert.id,
                        severity = %alert.severity,
                        "New alert: {}",
                        alert.condition_title
                    );
                    outcome.created.push(alert);
                }
                Ok(None) => outcome.suppressed += 1,
                Err(e) => {
                    error!(
                        station_id,
                        condition = t.condition.key,
                        "Failed to commit alert: {}",
                        e
                    );
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }

    async fn commit_one(&self, station_id: i32, t: &Triggered) -> Result<Option<Alert>, StoreError> {
        // ---
        let key = t.condition.key;
        let lock = self.locks.get((station_id, key)).await;
        let _guard = lock.lock().await;

        if let Some(existing) =
            with_timeout(self.timeout, self.store.find_active(station_id, key)).await?
        {
            debug!(
                station_id,
                condition = key,
                existing_id = existing.id,
                existing_severity = %existing.severity,
                triggered_severity = %t.severity,
                "Duplicate alert suppressed"
            );
            return Ok(None);
        }

        match with_timeout(self.timeout, self.store.create(t.to_new_alert(station_id))).await {
            Ok(alert) => Ok(Some(alert)),
            // Another process won the race on the store's uniqueness rule.
            Err(StoreError::DuplicateActive { .. }) => {
                debug!(station_id, condition = key, "Duplicate alert suppressed by store");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Mark an alert inactive and attended.
    ///
    /// Acknowledging an already attended alert succeeds with
    /// [`Acknowledgement::AlreadyAttended`]; an unknown id yields
    /// [`StoreError::NotFound`].
    pub async fn acknowledge(&self, alert_id: i32) -> Result<Acknowledgement, StoreError> {
        // ---
        let ack = with_timeout(self.timeout, self.store.set_attended(alert_id)).await?;
        if ack.changed() {
            info!(alert_id, "Alert attended");
        } else {
            debug!(alert_id, "Alert was already attended");
        }
        Ok(ack)
    }
}
