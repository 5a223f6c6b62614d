//! Error types for sherpa-dns.

use thiserror::Error;

use crate::provider::ProviderError;

/// Errors that can occur in the reconciliation daemon.
#[derive(Debug, Error)]
pub enum SherpaError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// DNS provider error
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Container runtime error
    #[error("container runtime error: {0}")]
    Runtime(#[from] bollard::errors::Error),

    /// Container inventory listing exceeded its deadline
    #[error("container snapshot timed out")]
    SnapshotTimeout,

    /// HTTP client construction error
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
