//! Metrics instrumentation for sherpa-dns.
//!
//! All metrics are prefixed with `sherpa_dns.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// Record a completed reconciliation tick.
pub fn record_reconciliation(result: TickResult, duration: std::time::Duration) {
    let result_str = match result {
        TickResult::Success => "success",
        TickResult::SourceError => "source_error",
        TickResult::RegistryError => "registry_error",
    };

    counter!("sherpa_dns.reconcile.count", "result" => result_str).increment(1);
    histogram!("sherpa_dns.reconcile.duration.seconds").record(duration.as_secs_f64());
}

/// Tick outcome for metrics.
#[derive(Debug, Clone, Copy)]
pub enum TickResult {
    /// Tick ran to completion.
    Success,
    /// The container snapshot failed; tick aborted.
    SourceError,
    /// The owned-set read failed; tick aborted.
    RegistryError,
}

/// Record one applied change by kind (`create`, `update`, `delete`).
pub fn record_change(kind: &str) {
    counter!("sherpa_dns.changes.count", "kind" => kind.to_string()).increment(1);
}

/// Record a classified provider error.
pub fn record_provider_error(class: &str) {
    counter!("sherpa_dns.provider.errors.count", "class" => class.to_string()).increment(1);
}

/// Record a relevant container lifecycle event.
pub fn record_container_event(action: &str) {
    counter!("sherpa_dns.source.events.count", "action" => action.to_string()).increment(1);
}

/// Record a nudge accepted into the coalescing channel.
pub fn record_nudge() {
    counter!("sherpa_dns.source.nudges.count").increment(1);
}

/// Record the sizes observed during a tick.
pub fn record_state_counts(desired: usize, owned: usize, pending_deletions: usize) {
    gauge!("sherpa_dns.endpoints.desired").set(desired as f64);
    gauge!("sherpa_dns.endpoints.owned").set(owned as f64);
    gauge!("sherpa_dns.cleanup.pending").set(pending_deletions as f64);
}

/// Record the size of a computed plan.
pub fn record_plan(creates: usize, updates: usize, deletes: usize) {
    gauge!("sherpa_dns.plan.creates").set(creates as f64);
    gauge!("sherpa_dns.plan.updates").set(updates as f64);
    gauge!("sherpa_dns.plan.deletes").set(deletes as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
