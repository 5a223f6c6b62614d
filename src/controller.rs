//! The reconciliation loop.
//!
//! Each tick reads the desired set from the source and the owned set from
//! the registry, plans the delta, routes deletes through the cleanup
//! scheduler, and hands the rest to the registry. Ticks are strictly
//! serial; source nudges only bring the next tick forward. Read failures
//! abort the tick: an empty snapshot is never interpreted as "delete
//! everything".

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cleanup::CleanupScheduler;
use crate::config::ControllerConfig;
use crate::health::HealthState;
use crate::metrics::{self, TickResult};
use crate::plan::{plan, Change, Plan};
use crate::registry::TxtRegistry;
use crate::source::{ContainerSource, Nudge};

/// Minimum gap between consecutive ticks, so event storms cannot spin the
/// loop.
const MIN_TICK_GAP: Duration = Duration::from_secs(1);

/// Owns the periodic reconciliation pipeline.
pub struct Controller {
    source: ContainerSource,
    registry: TxtRegistry,
    scheduler: CleanupScheduler,
    interval: Duration,
    once: bool,
    dry_run: bool,
    cleanup_on_stop: bool,
    health: HealthState,
}

impl Controller {
    /// Assemble the controller from its collaborators and configuration.
    pub fn new(
        source: ContainerSource,
        registry: TxtRegistry,
        config: &ControllerConfig,
        health: HealthState,
    ) -> Self {
        Self {
            source,
            registry,
            scheduler: CleanupScheduler::new(config.cleanup_delay),
            interval: config.interval,
            once: config.once,
            dry_run: config.dry_run,
            cleanup_on_stop: config.cleanup_on_stop,
            health,
        }
    }

    /// Number of deletions currently waiting out their grace period.
    pub fn pending_deletions(&self) -> usize {
        self.scheduler.len()
    }

    /// Run until cancelled (or after a single pass in one-shot mode).
    pub async fn run(mut self, mut nudges: mpsc::Receiver<Nudge>, cancel: CancellationToken) {
        if self.once {
            info!("one-shot mode: reconciling once");
            self.reconcile().await;
            return;
        }

        info!(interval = ?self.interval, "reconciliation loop starting");
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut nudges_open = true;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("controller shutting down");
                    return;
                }

                _ = ticker.tick() => {}

                nudge = nudges.recv(), if nudges_open => {
                    match nudge {
                        Some(Nudge) => {
                            debug!("nudge received, reconciling early");
                            tokio::select! {
                                _ = cancel.cancelled() => return,
                                _ = sleep(MIN_TICK_GAP) => {}
                            }
                            // Anything queued during the gap rides this tick.
                            while nudges.try_recv().is_ok() {}
                            ticker.reset();
                        }
                        None => {
                            warn!("nudge channel closed, relying on periodic ticks");
                            nudges_open = false;
                            continue;
                        }
                    }
                }
            }

            self.reconcile().await;
        }
    }

    /// Perform a single reconciliation pass.
    pub async fn reconcile(&mut self) {
        let timer = metrics::Timer::start();

        let desired = match self.source.snapshot().await {
            Ok(desired) => desired,
            Err(e) => {
                warn!(error = %e, "container snapshot failed, skipping tick");
                self.health.set_last_tick(false);
                metrics::record_reconciliation(TickResult::SourceError, timer.elapsed());
                return;
            }
        };

        let current = match self.registry.owned().await {
            Ok(current) => current,
            Err(e) => {
                warn!(error = %e, "reading owned records failed, skipping tick");
                self.health.set_last_tick(false);
                metrics::record_reconciliation(TickResult::RegistryError, timer.elapsed());
                return;
            }
        };

        debug!(
            desired = desired.len(),
            current = current.len(),
            "reconciling"
        );

        let mut plan = plan(&desired, &current);
        metrics::record_plan(plan.creates.len(), plan.updates.len(), plan.deletes.len());

        // Deletes never go straight to the registry: they wait out the
        // grace period, or are discarded when cleanup is disabled.
        let vanished = std::mem::take(&mut plan.deletes);
        if self.cleanup_on_stop {
            let now = Instant::now();
            for endpoint in vanished {
                self.scheduler.schedule(endpoint, now);
            }
        } else if !vanished.is_empty() {
            info!(
                count = vanished.len(),
                "endpoints no longer desired, but cleanup_on_stop is disabled"
            );
        }

        // Endpoints that came back cancel their pending deletion.
        for endpoint in &desired {
            self.scheduler.cancel(&endpoint.key());
        }

        if self.dry_run {
            self.render_plan(&plan);
        } else {
            if plan.is_empty() {
                debug!("no immediate changes");
            } else {
                info!(
                    creates = plan.creates.len(),
                    updates = plan.updates.len(),
                    "applying changes"
                );
            }
            // Runs even for an empty plan: stale sidecars found during the
            // owned read are garbage-collected here.
            let summary = self.registry.apply(&plan).await;
            debug!(?summary, "apply finished");
        }

        let due = if self.once {
            self.scheduler.drain()
        } else {
            self.scheduler.due(Instant::now())
        };
        if !due.is_empty() {
            let deletions = Plan::deletion_only(due);
            if self.dry_run {
                self.render_plan(&deletions);
            } else {
                info!(deletes = deletions.deletes.len(), "applying due deletions");
                let summary = self.registry.apply(&deletions).await;
                debug!(?summary, "deletion apply finished");
            }
        }

        metrics::record_state_counts(desired.len(), current.len(), self.scheduler.len());
        self.health.set_last_tick(true);
        metrics::record_reconciliation(TickResult::Success, timer.elapsed());
    }

    fn render_plan(&self, plan: &Plan) {
        for change in plan.changes() {
            match change {
                Change::Create(ep) => info!(endpoint = %ep, "DRY RUN: would create"),
                Change::UpdateTo(ep) => info!(endpoint = %ep, "DRY RUN: would update to"),
                Change::Delete(ep) => info!(endpoint = %ep, "DRY RUN: would delete"),
            }
        }
    }
}
