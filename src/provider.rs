//! Provider abstraction: a narrow facade over a hosted DNS API.
//!
//! Implementations expose zone listing and record CRUD; everything above
//! this trait (ownership, planning, scheduling) is provider-agnostic.
//! Errors classify into the failure taxonomy the registry and controller
//! act on: transient errors retry next tick, permanent errors drop the
//! change, rate limits back off within the tick, auth errors are fatal at
//! startup.

use async_trait::async_trait;
use thiserror::Error;

use crate::endpoint::{ProviderRecord, Zone};

/// Errors from a provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level failure (connect, TLS, timeout, decode).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// First error message from the response body, if any.
        message: String,
    },

    /// The API answered 2xx but the envelope flagged failure.
    #[error("API rejected request: {0}")]
    Rejected(String),
}

/// Failure classes the reconciler distinguishes, per the error-handling
/// taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry next tick (5xx, timeouts, transport failures).
    Transient,
    /// Drop this change until inputs differ (4xx other than 401/403/429).
    Permanent,
    /// Back off within the tick, then defer the remainder (429).
    RateLimited,
    /// Credential is unusable; unrecoverable (401/403).
    Auth,
}

impl ProviderError {
    /// Classify this error for retry handling.
    pub fn class(&self) -> ErrorClass {
        match self {
            ProviderError::Transport(e) => {
                if e.status().map_or(false, |s| s.is_client_error()) {
                    ErrorClass::Permanent
                } else {
                    ErrorClass::Transient
                }
            }
            ProviderError::Api { status, .. } => match status {
                401 | 403 => ErrorClass::Auth,
                429 => ErrorClass::RateLimited,
                400..=499 => ErrorClass::Permanent,
                _ => ErrorClass::Transient,
            },
            ProviderError::Rejected(_) => ErrorClass::Permanent,
        }
    }

    /// Metrics label for the class.
    pub fn class_label(&self) -> &'static str {
        match self.class() {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::Auth => "auth",
        }
    }
}

/// Shape of a record write, independent of endpoint bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSpec {
    /// Fully qualified record name.
    pub name: String,
    /// Record type as the provider spells it (`A`, `CNAME`, `TXT`).
    pub record_type: String,
    /// Record content: one address, one target, or one quoted TXT payload.
    pub content: String,
    /// TTL in seconds, `1` meaning automatic.
    pub ttl: u32,
    /// Proxy flag; providers without the knob ignore it.
    pub proxied: bool,
}

/// Capability set every DNS provider implements.
///
/// Each call is independently fallible and carries its own deadline; the
/// caller decides what a failure means for the rest of the plan.
#[async_trait]
pub trait Provider: Send + Sync {
    /// List managed zones, already filtered by the domain include/exclude
    /// rules.
    async fn zones(&self) -> Result<Vec<Zone>, ProviderError>;

    /// List all records in a zone.
    async fn records(&self, zone: &Zone) -> Result<Vec<ProviderRecord>, ProviderError>;

    /// Create a record; returns the provider-assigned id.
    async fn create_record(&self, zone: &Zone, record: &RecordSpec)
        -> Result<String, ProviderError>;

    /// Replace the record identified by `record_id` with `record`.
    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        record: &RecordSpec,
    ) -> Result<(), ProviderError>;

    /// Delete the record identified by `record_id`.
    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<(), ProviderError>;
}
