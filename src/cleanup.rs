//! Delayed-deletion scheduling.
//!
//! When a container disappears, its endpoints are not deleted right away:
//! they sit here for a grace period so a restart does not churn DNS. The
//! state is process-local and in-memory; after a daemon restart the next
//! tick re-observes the absent containers and queues them again.

use std::collections::HashMap;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::endpoint::{Endpoint, EndpointKey};

/// In-memory queue of endpoints awaiting deletion.
#[derive(Debug)]
pub struct CleanupScheduler {
    delay: std::time::Duration,
    pending: HashMap<EndpointKey, (Endpoint, Instant)>,
}

impl CleanupScheduler {
    /// Build a scheduler with the configured grace period.
    pub fn new(delay: std::time::Duration) -> Self {
        Self {
            delay,
            pending: HashMap::new(),
        }
    }

    /// Queue an endpoint for deletion at `now + delay`. Re-scheduling an
    /// already pending key keeps the original deadline.
    pub fn schedule(&mut self, endpoint: Endpoint, now: Instant) {
        let key = endpoint.key();
        if self.pending.contains_key(&key) {
            debug!(name = %key.0, "endpoint already pending deletion");
            return;
        }
        info!(
            name = %key.0,
            record_type = %key.1,
            delay = ?self.delay,
            "scheduled endpoint for delayed deletion"
        );
        self.pending.insert(key, (endpoint, now));
    }

    /// Drop a pending deletion because the endpoint reappeared. Returns
    /// whether anything was cancelled.
    pub fn cancel(&mut self, key: &EndpointKey) -> bool {
        if self.pending.remove(key).is_some() {
            info!(name = %key.0, record_type = %key.1, "cancelled pending deletion");
            true
        } else {
            false
        }
    }

    /// Remove and return every endpoint whose grace period has elapsed,
    /// sorted by key.
    pub fn due(&mut self, now: Instant) -> Vec<Endpoint> {
        let delay = self.delay;
        let mut due: Vec<Endpoint> = Vec::new();
        self.pending.retain(|_, (endpoint, scheduled_at)| {
            if now.duration_since(*scheduled_at) >= delay {
                due.push(endpoint.clone());
                false
            } else {
                true
            }
        });
        due.sort_by(|a, b| a.key().cmp(&b.key()));
        due
    }

    /// Remove and return everything regardless of deadline (one-shot mode).
    pub fn drain(&mut self) -> Vec<Endpoint> {
        let mut all: Vec<Endpoint> = self
            .pending
            .drain()
            .map(|(_, (endpoint, _))| endpoint)
            .collect();
        all.sort_by(|a, b| a.key().cmp(&b.key()));
        all
    }

    /// Number of pending deletions.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::RecordType;
    use std::time::Duration;

    fn endpoint(name: &str) -> Endpoint {
        Endpoint::new(name, RecordType::A, vec!["10.0.0.5".to_string()])
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_due_before_delay() {
        let mut scheduler = CleanupScheduler::new(Duration::from_secs(900));
        scheduler.schedule(endpoint("app.example.com"), Instant::now());

        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(scheduler.due(Instant::now()).is_empty());
        assert_eq!(scheduler.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_after_delay() {
        let mut scheduler = CleanupScheduler::new(Duration::from_secs(900));
        scheduler.schedule(endpoint("app.example.com"), Instant::now());

        tokio::time::advance(Duration::from_secs(960)).await;
        let due = scheduler.due(Instant::now());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].dns_name, "app.example.com");
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_deletion() {
        let mut scheduler = CleanupScheduler::new(Duration::from_secs(900));
        let ep = endpoint("app.example.com");
        scheduler.schedule(ep.clone(), Instant::now());

        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(scheduler.cancel(&ep.key()));

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(scheduler.due(Instant::now()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_keeps_original_deadline() {
        let mut scheduler = CleanupScheduler::new(Duration::from_secs(900));
        scheduler.schedule(endpoint("app.example.com"), Instant::now());

        // A later tick re-observes the same absence.
        tokio::time::advance(Duration::from_secs(600)).await;
        scheduler.schedule(endpoint("app.example.com"), Instant::now());

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(scheduler.due(Instant::now()).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_ignores_deadlines() {
        let mut scheduler = CleanupScheduler::new(Duration::from_secs(900));
        scheduler.schedule(endpoint("b.example.com"), Instant::now());
        scheduler.schedule(endpoint("a.example.com"), Instant::now());

        let drained = scheduler.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].dns_name, "a.example.com");
        assert_eq!(drained[1].dns_name, "b.example.com");
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_unknown_key_is_noop() {
        let mut scheduler = CleanupScheduler::new(Duration::from_secs(900));
        assert!(!scheduler.cancel(&endpoint("ghost.example.com").key()));
    }
}
