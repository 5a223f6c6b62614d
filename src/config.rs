//! Configuration types for sherpa-dns.
//!
//! Configuration is YAML with `${NAME}` / `${NAME:-default}` environment
//! interpolation applied before parsing. Every component receives a
//! read-only snapshot of its section at construction; nothing re-reads
//! configuration at runtime.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::SherpaError;

/// Paths probed, in order, when no `--config` argument is given.
const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "./sherpa-dns.yaml",
    "./sherpa-dns.yml",
    "/etc/sherpa-dns/sherpa-dns.yaml",
    "/etc/sherpa-dns/config.yaml",
];

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Container source configuration.
    #[serde(default)]
    pub source: SourceConfig,

    /// DNS provider configuration.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Ownership registry configuration.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Reconciliation loop configuration.
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Zone include/exclude patterns.
    #[serde(default)]
    pub domains: DomainsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Health endpoint configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Container source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Label namespace, e.g. `sherpa.dns` for `sherpa.dns/hostname`.
    #[serde(default = "default_label_prefix")]
    pub label_prefix: String,

    /// Extra include filter: `KEY` (presence) or `KEY=VALUE` (match).
    /// Empty means no filtering.
    #[serde(default)]
    pub label_filter: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            label_prefix: default_label_prefix(),
            label_filter: String::new(),
        }
    }
}

/// DNS provider selection plus provider-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Provider implementation to use. Only `cloudflare` is supported.
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// Cloudflare-specific settings.
    #[serde(default)]
    pub cloudflare: CloudflareConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            cloudflare: CloudflareConfig::default(),
        }
    }
}

/// Cloudflare API settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloudflareConfig {
    /// Bearer credential for the Cloudflare v4 API. Required.
    #[serde(default)]
    pub api_token: String,

    /// Default for the `proxied` flag on endpoints that do not set the
    /// label.
    #[serde(default)]
    pub proxied_by_default: bool,
}

/// Ownership registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Registry implementation to use. Only `txt` is supported.
    #[serde(rename = "type", default = "default_registry_type")]
    pub registry_type: String,

    /// Prefix prepended to the leftmost label of a sidecar name.
    #[serde(default = "default_txt_prefix")]
    pub txt_prefix: String,

    /// Identity stamp written into every sidecar this instance owns.
    #[serde(default = "default_txt_owner_id")]
    pub txt_owner_id: String,

    /// Substitution for `*` when deriving a sidecar name from a wildcard
    /// endpoint. Must not collide with legal label content in managed names.
    #[serde(default = "default_txt_wildcard_replacement")]
    pub txt_wildcard_replacement: String,

    /// Encrypt sidecar payloads with AES-256-GCM.
    #[serde(default)]
    pub encrypt_txt: bool,

    /// Passphrase the encryption key is derived from. Required when
    /// `encrypt_txt` is set.
    #[serde(default)]
    pub encryption_key: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_type: default_registry_type(),
            txt_prefix: default_txt_prefix(),
            txt_owner_id: default_txt_owner_id(),
            txt_wildcard_replacement: default_txt_wildcard_replacement(),
            encrypt_txt: false,
            encryption_key: None,
        }
    }
}

/// Reconciliation loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    /// Tick period.
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,

    /// Perform one reconciliation, drain pending deletions, and exit.
    #[serde(default)]
    pub once: bool,

    /// Compute and log plans without any mutating provider call.
    #[serde(default)]
    pub dry_run: bool,

    /// Whether records of vanished containers are deleted at all.
    #[serde(default = "default_true")]
    pub cleanup_on_stop: bool,

    /// Grace period between a container vanishing and its records being
    /// deleted.
    #[serde(with = "humantime_serde", default = "default_cleanup_delay")]
    pub cleanup_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            once: false,
            dry_run: false,
            cleanup_on_stop: true,
            cleanup_delay: default_cleanup_delay(),
        }
    }
}

/// Zone allow/deny patterns. Each pattern is a literal name or a
/// `*.`-prefixed wildcard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainsConfig {
    /// Zone allow-list; empty means all zones.
    #[serde(default)]
    pub include: Vec<String>,

    /// Zone deny-list; wins over include.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "sherpa_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Health endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    /// Address the `/health` and `/metrics` server binds to.
    #[serde(default = "default_health_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_health_addr(),
        }
    }
}

fn default_label_prefix() -> String {
    "sherpa.dns".to_string()
}

fn default_provider_name() -> String {
    "cloudflare".to_string()
}

fn default_registry_type() -> String {
    "txt".to_string()
}

fn default_txt_prefix() -> String {
    "sherpa-dns-".to_string()
}

fn default_txt_owner_id() -> String {
    "default".to_string()
}

fn default_txt_wildcard_replacement() -> String {
    "star".to_string()
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_cleanup_delay() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_health_addr() -> SocketAddr {
    ([0, 0, 0, 0], 8080).into()
}

impl Config {
    /// Load configuration from `path`, or from the first existing default
    /// path when `path` is `None`. A missing file yields pure defaults
    /// (which then fail validation on the required token).
    pub fn load(path: Option<&Path>) -> Result<Self, SherpaError> {
        let candidate = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(SherpaError::Config(format!(
                        "configuration file not found: {}",
                        p.display()
                    )));
                }
                Some(p.to_path_buf())
            }
            None => DEFAULT_CONFIG_PATHS
                .iter()
                .map(PathBuf::from)
                .find(|p| p.exists()),
        };

        let config = match candidate {
            Some(p) => {
                let raw = std::fs::read_to_string(&p)?;
                Self::from_yaml(&raw)?
            }
            None => Config::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string after environment-variable
    /// interpolation.
    pub fn from_yaml(raw: &str) -> Result<Self, SherpaError> {
        let interpolated = interpolate_env(raw);
        Ok(serde_yaml::from_str(&interpolated)?)
    }

    /// Reject configurations the daemon cannot run with.
    pub fn validate(&self) -> Result<(), SherpaError> {
        if self.provider.name != "cloudflare" {
            return Err(SherpaError::Config(format!(
                "unsupported provider: {}",
                self.provider.name
            )));
        }
        if self.registry.registry_type != "txt" {
            return Err(SherpaError::Config(format!(
                "unsupported registry type: {}",
                self.registry.registry_type
            )));
        }
        if self.provider.cloudflare.api_token.is_empty() {
            return Err(SherpaError::Config(
                "provider.cloudflare.api_token is required".to_string(),
            ));
        }
        if self.registry.encrypt_txt
            && self
                .registry
                .encryption_key
                .as_deref()
                .unwrap_or_default()
                .is_empty()
        {
            return Err(SherpaError::Config(
                "registry.encryption_key is required when registry.encrypt_txt is set".to_string(),
            ));
        }
        if self.controller.interval < Duration::from_secs(1) {
            return Err(SherpaError::Config(
                "controller.interval must be at least 1s".to_string(),
            ));
        }
        Ok(())
    }
}

/// Substitute `${NAME}` and `${NAME:-default}` with environment values.
/// Unset variables without a default become the empty string.
fn interpolate_env(content: &str) -> String {
    // Unwrap is fine: the pattern is a compile-time constant.
    let pattern = Regex::new(r"\$\{([^}]+)\}").unwrap();
    pattern
        .replace_all(content, |caps: &Captures<'_>| {
            let inner = &caps[1];
            match inner.split_once(":-") {
                Some((name, default)) => {
                    std::env::var(name).unwrap_or_else(|_| default.to_string())
                }
                None => std::env::var(inner).unwrap_or_default(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.source.label_prefix, "sherpa.dns");
        assert_eq!(config.provider.name, "cloudflare");
        assert_eq!(config.registry.registry_type, "txt");
        assert_eq!(config.registry.txt_prefix, "sherpa-dns-");
        assert_eq!(config.registry.txt_owner_id, "default");
        assert_eq!(config.registry.txt_wildcard_replacement, "star");
        assert!(!config.registry.encrypt_txt);
        assert_eq!(config.controller.interval, Duration::from_secs(60));
        assert!(config.controller.cleanup_on_stop);
        assert_eq!(config.controller.cleanup_delay, Duration::from_secs(900));
        assert!(!config.controller.once);
        assert!(!config.controller.dry_run);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_nested_yaml_parses() {
        let yaml = r#"
source:
  label_prefix: acme.dns
  label_filter: "com.example.managed=true"
provider:
  name: cloudflare
  cloudflare:
    api_token: secret
    proxied_by_default: true
registry:
  type: txt
  txt_owner_id: host-a
controller:
  interval: 30s
  cleanup_delay: 5m
  dry_run: true
domains:
  include: ["example.com", "*.example.org"]
  exclude: ["internal.example.org"]
logging:
  level: debug
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.source.label_prefix, "acme.dns");
        assert!(config.provider.cloudflare.proxied_by_default);
        assert_eq!(config.registry.txt_owner_id, "host-a");
        assert_eq!(config.controller.interval, Duration::from_secs(30));
        assert_eq!(config.controller.cleanup_delay, Duration::from_secs(300));
        assert!(config.controller.dry_run);
        assert_eq!(config.domains.include.len(), 2);
        assert_eq!(config.logging.level, "debug");
        config.validate().unwrap();
    }

    #[test]
    fn test_env_interpolation_with_default() {
        std::env::remove_var("SHERPA_TEST_UNSET");
        let out = interpolate_env("token: ${SHERPA_TEST_UNSET:-fallback}");
        assert_eq!(out, "token: fallback");
    }

    #[test]
    fn test_env_interpolation_set_variable() {
        std::env::set_var("SHERPA_TEST_TOKEN", "s3cr3t");
        let out = interpolate_env("token: ${SHERPA_TEST_TOKEN}");
        assert_eq!(out, "token: s3cr3t");
        std::env::remove_var("SHERPA_TEST_TOKEN");
    }

    #[test]
    fn test_env_interpolation_unset_without_default_is_empty() {
        std::env::remove_var("SHERPA_TEST_MISSING");
        let out = interpolate_env("token: \"${SHERPA_TEST_MISSING}\"");
        assert_eq!(out, "token: \"\"");
    }

    #[test]
    fn test_validate_requires_api_token() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(SherpaError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_encrypt_without_key() {
        let mut config = Config::default();
        config.provider.cloudflare.api_token = "tok".into();
        config.registry.encrypt_txt = true;
        assert!(config.validate().is_err());

        config.registry.encryption_key = Some("passphrase".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_provider() {
        let mut config = Config::default();
        config.provider.cloudflare.api_token = "tok".into();
        config.provider.name = "route53".into();
        assert!(config.validate().is_err());
    }
}
