//! Health and metrics HTTP endpoint.
//!
//! `GET /health` answers 200 only when the last reconciliation tick
//! completed and the container event subscription is alive; `GET /metrics`
//! renders the Prometheus registry.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::SherpaError;

/// Shared liveness flags, written by the controller and the event pump,
/// read by the health endpoint.
#[derive(Debug, Clone, Default)]
pub struct HealthState {
    inner: Arc<HealthInner>,
}

#[derive(Debug, Default)]
struct HealthInner {
    last_tick_ok: AtomicBool,
    events_alive: AtomicBool,
}

impl HealthState {
    /// Fresh state; unhealthy until the first tick completes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of the latest tick.
    pub fn set_last_tick(&self, ok: bool) {
        self.inner.last_tick_ok.store(ok, Ordering::Relaxed);
    }

    /// Record whether the event subscription is currently connected.
    pub fn set_events_alive(&self, alive: bool) {
        self.inner.events_alive.store(alive, Ordering::Relaxed);
    }

    /// Healthy iff the last tick completed and events are flowing.
    pub fn is_healthy(&self) -> bool {
        self.inner.last_tick_ok.load(Ordering::Relaxed)
            && self.inner.events_alive.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Clone)]
struct AppState {
    health: HealthState,
    prometheus: PrometheusHandle,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    if state.health.is_healthy() {
        (StatusCode::OK, Json(HealthResponse { status: "healthy" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy",
            }),
        )
    }
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.prometheus.render()
}

/// Serve `/health` and `/metrics` until the token is cancelled.
pub async fn serve(
    addr: SocketAddr,
    health_state: HealthState,
    prometheus: PrometheusHandle,
    cancel: CancellationToken,
) -> Result<(), SherpaError> {
    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(AppState {
            health: health_state,
            prometheus,
        });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "health endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    info!("health endpoint stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unhealthy_until_first_tick_and_events() {
        let state = HealthState::new();
        assert!(!state.is_healthy());

        state.set_last_tick(true);
        assert!(!state.is_healthy());

        state.set_events_alive(true);
        assert!(state.is_healthy());
    }

    #[test]
    fn test_failed_tick_goes_unhealthy() {
        let state = HealthState::new();
        state.set_last_tick(true);
        state.set_events_alive(true);
        assert!(state.is_healthy());

        state.set_last_tick(false);
        assert!(!state.is_healthy());
    }

    #[test]
    fn test_clones_share_state() {
        let state = HealthState::new();
        let clone = state.clone();
        clone.set_last_tick(true);
        clone.set_events_alive(true);
        assert!(state.is_healthy());
    }
}
