//! Sherpa-DNS - reconciles DNS records at a hosted provider against the
//! containers running on this host.
//!
//! Container authors declare desired DNS state with labels
//! (`sherpa.dns/hostname`, `sherpa.dns/type`, ...); the daemon observes the
//! container runtime, diffs the desired set against the records it owns at
//! the provider, and applies the minimum changes to converge. Ownership is
//! encoded in TXT sidecar records inside the same zone, so the daemon never
//! touches records it did not create and can clean up reliably when
//! containers vanish.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           sherpa-dns                             │
//! │                                                                  │
//! │  ┌────────────────┐  snapshot   ┌────────────┐                   │
//! │  │ ContainerSource│────────────▶│            │   plan            │
//! │  │ (Docker labels)│   nudges    │ Controller │──────────┐        │
//! │  └────────────────┘────────────▶│            │          ▼        │
//! │                                 └────────────┘   ┌────────────┐  │
//! │                                       │          │  Planner   │  │
//! │                                       │ deletes  └────────────┘  │
//! │                                       ▼                          │
//! │                              ┌─────────────────┐                 │
//! │                              │ CleanupScheduler│ (grace period)  │
//! │                              └─────────────────┘                 │
//! │                                       │ due                      │
//! │                                       ▼                          │
//! │  ┌────────────────┐  owned   ┌─────────────┐  CRUD  ┌─────────┐ │
//! │  │  TXT sidecars  │◀────────▶│ TxtRegistry │───────▶│Provider │ │
//! │  │  (ownership)   │          └─────────────┘        │(CF API) │ │
//! │  └────────────────┘                                 └─────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Deletions are deferred by a configurable grace period so container
//! restarts do not churn DNS. Records without a valid sidecar are foreign
//! and strictly read-only to this daemon.

#![warn(missing_docs)]

pub mod cleanup;
pub mod cloudflare;
pub mod config;
pub mod controller;
pub mod crypto;
pub mod docker;
pub mod domain_filter;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod metrics;
pub mod plan;
pub mod provider;
pub mod registry;
pub mod source;
pub mod telemetry;

// Re-export main types
pub use config::Config;
pub use controller::Controller;
pub use endpoint::{Endpoint, RecordType};
pub use error::SherpaError;
pub use plan::Plan;
pub use registry::TxtRegistry;
pub use source::ContainerSource;
