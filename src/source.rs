//! Container source: turns the runtime's inventory into desired endpoints.
//!
//! Containers declare DNS state through labels under a configurable prefix
//! (`sherpa.dns/hostname`, `sherpa.dns/type`, ...). The source projects
//! running containers onto endpoints and separately pumps runtime lifecycle
//! events into coalesced nudges so the controller reconciles sooner than
//! the next scheduled tick. The source never computes deltas from events.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SourceConfig;
use crate::endpoint::{Endpoint, EndpointKey, RecordType, SourceRef, TTL_AUTO};
use crate::error::SherpaError;
use crate::health::HealthState;
use crate::metrics;

/// Deadline for one inventory listing.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum reconnect backoff for the event subscription.
const MAX_BACKOFF_SECS: u64 = 30;

/// Opaque "something changed, reconcile soon" signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nudge;

/// A container lifecycle event as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    /// Container id the event refers to.
    pub id: String,
    /// What happened.
    pub action: ContainerAction,
}

/// Lifecycle actions the source cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerAction {
    /// Container started.
    Start,
    /// Container process exited.
    Die,
    /// Container was stopped.
    Stop,
    /// Container was killed.
    Kill,
    /// Anything else; ignored.
    Other(String),
}

impl ContainerAction {
    /// Whether this action should trigger a reconciliation nudge.
    pub fn is_relevant(&self) -> bool {
        !matches!(self, ContainerAction::Other(_))
    }

    /// Metrics label.
    pub fn label(&self) -> &str {
        match self {
            ContainerAction::Start => "start",
            ContainerAction::Die => "die",
            ContainerAction::Stop => "stop",
            ContainerAction::Kill => "kill",
            ContainerAction::Other(s) => s.as_str(),
        }
    }
}

impl From<&str> for ContainerAction {
    fn from(s: &str) -> Self {
        match s {
            "start" => ContainerAction::Start,
            "die" => ContainerAction::Die,
            "stop" => ContainerAction::Stop,
            "kill" => ContainerAction::Kill,
            other => ContainerAction::Other(other.to_string()),
        }
    }
}

/// One attached network of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerNetwork {
    /// Network name as the runtime reports it.
    pub name: String,
    /// IPv4 address on that network, when assigned.
    pub ipv4: Option<Ipv4Addr>,
}

/// A running container with the metadata the source needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Stable container id.
    pub id: String,
    /// Container name.
    pub name: String,
    /// Container labels.
    pub labels: HashMap<String, String>,
    /// Attached networks in the runtime's reported order.
    pub networks: Vec<ContainerNetwork>,
}

/// Capability set of a container runtime: inventory listing plus an event
/// stream. The reference implementation targets a Docker-compatible daemon
/// over a UNIX socket.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List all running containers.
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, SherpaError>;

    /// Open a stream of container lifecycle events. The stream ends or
    /// errors when the runtime connection drops; the caller reconnects.
    async fn subscribe_events<'a>(
        &'a self,
    ) -> Result<BoxStream<'a, Result<ContainerEvent, SherpaError>>, SherpaError>;
}

/// Extra include filter parsed from `source.label_filter`.
#[derive(Debug, Clone)]
enum LabelFilter {
    /// `KEY`: the label must be present.
    Presence(String),
    /// `KEY=VALUE`: the label must have exactly this value.
    Match(String, String),
}

impl LabelFilter {
    fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        match raw.split_once('=') {
            Some((k, v)) => Some(LabelFilter::Match(k.to_string(), v.to_string())),
            None => Some(LabelFilter::Presence(raw.to_string())),
        }
    }

    fn matches(&self, labels: &HashMap<String, String>) -> bool {
        match self {
            LabelFilter::Presence(key) => labels.contains_key(key),
            LabelFilter::Match(key, value) => labels.get(key).map(String::as_str) == Some(value),
        }
    }
}

/// Desired-state source over a container runtime.
pub struct ContainerSource {
    runtime: Arc<dyn ContainerRuntime>,
    label_prefix: String,
    label_filter: Option<LabelFilter>,
    proxied_by_default: bool,
}

impl ContainerSource {
    /// Build a source from its configuration section.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        config: &SourceConfig,
        proxied_by_default: bool,
    ) -> Self {
        Self {
            runtime,
            label_prefix: config.label_prefix.clone(),
            label_filter: LabelFilter::parse(&config.label_filter),
            proxied_by_default,
        }
    }

    /// Produce the current desired endpoint set.
    ///
    /// Containers without a hostname label are skipped, invalid entries are
    /// dropped with a warning, and keys claimed by containers with
    /// conflicting shapes are dropped entirely rather than guessed at.
    pub async fn snapshot(&self) -> Result<Vec<Endpoint>, SherpaError> {
        let containers = tokio::time::timeout(SNAPSHOT_TIMEOUT, self.runtime.list_containers())
            .await
            .map_err(|_| SherpaError::SnapshotTimeout)??;

        let mut endpoints = Vec::new();
        for container in &containers {
            if let Some(filter) = &self.label_filter {
                if !filter.matches(&container.labels) {
                    continue;
                }
            }
            endpoints.extend(project_container(
                container,
                &self.label_prefix,
                self.proxied_by_default,
            ));
        }

        let endpoints = dedup_endpoints(endpoints);
        debug!(count = endpoints.len(), "built desired endpoint snapshot");
        Ok(endpoints)
    }

    /// Spawn the event pump. Relevant runtime events are coalesced into
    /// nudges on the returned channel; a full channel already means a
    /// reconciliation is due, so further events are dropped silently.
    pub fn spawn_event_pump(
        &self,
        health: HealthState,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Nudge> {
        let (tx, rx) = mpsc::channel(1);
        let runtime = Arc::clone(&self.runtime);
        tokio::spawn(async move {
            event_pump(runtime, tx, health, cancel).await;
        });
        rx
    }
}

/// Run the event subscription until cancelled, reconnecting with capped
/// exponential backoff.
async fn event_pump(
    runtime: Arc<dyn ContainerRuntime>,
    tx: mpsc::Sender<Nudge>,
    health: HealthState,
    cancel: CancellationToken,
) {
    let mut backoff_secs = 1u64;

    loop {
        if cancel.is_cancelled() {
            info!("event pump shutting down");
            return;
        }

        let mut stream = match runtime.subscribe_events().await {
            Ok(s) => {
                backoff_secs = 1;
                health.set_events_alive(true);
                info!("subscribed to container events");
                s
            }
            Err(e) => {
                error!(error = %e, "failed to subscribe to container events");
                health.set_events_alive(false);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep(Duration::from_secs(backoff_secs)) => {}
                }
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                continue;
            }
        };

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("event pump received shutdown signal");
                    return;
                }

                item = stream.next() => match item {
                    Some(Ok(event)) if event.action.is_relevant() => {
                        metrics::record_container_event(event.action.label());
                        debug!(id = %event.id, action = event.action.label(), "container event");
                        if tx.try_send(Nudge).is_ok() {
                            metrics::record_nudge();
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "event stream error, reconnecting");
                        health.set_events_alive(false);
                        break;
                    }
                    None => {
                        info!("event stream ended, reconnecting");
                        health.set_events_alive(false);
                        break;
                    }
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(Duration::from_secs(1)) => {}
        }
    }
}

/// Project one container's labels onto endpoints.
fn project_container(
    container: &ContainerInfo,
    label_prefix: &str,
    proxied_by_default: bool,
) -> Vec<Endpoint> {
    let label = |key: &str| container.labels.get(&format!("{label_prefix}/{key}"));

    let Some(hostnames) = label("hostname") else {
        return Vec::new();
    };

    let record_type = match label("type") {
        None => RecordType::A,
        Some(raw) => match raw.parse() {
            Ok(t) => t,
            Err(()) => {
                warn!(container = %container.name, value = %raw, "unsupported record type label");
                return Vec::new();
            }
        },
    };

    let ttl = match label("ttl") {
        None => TTL_AUTO,
        Some(raw) => match raw.parse::<u32>() {
            Ok(n) if n >= 1 => n,
            _ => {
                warn!(container = %container.name, value = %raw, "invalid ttl label");
                return Vec::new();
            }
        },
    };

    let proxied = match label("proxied") {
        None => proxied_by_default,
        Some(raw) => raw.eq_ignore_ascii_case("true"),
    };

    let target = match resolve_target(container, record_type, label("target"), label("network")) {
        Some(t) => t,
        None => return Vec::new(),
    };

    let mut endpoints = Vec::new();
    for hostname in hostnames.split(',').map(str::trim).filter(|h| !h.is_empty()) {
        if !is_valid_dns_name(hostname) {
            warn!(container = %container.name, hostname, "invalid hostname label, dropping");
            continue;
        }
        let mut endpoint = Endpoint::new(hostname, record_type, vec![target.clone()]);
        endpoint.ttl = ttl;
        endpoint.proxied = proxied;
        endpoint.source_ref = Some(SourceRef {
            id: container.id.clone(),
            name: container.name.clone(),
        });
        endpoints.push(endpoint);
    }
    endpoints
}

/// Pick the record target: the explicit label when present, otherwise the
/// container's network address (A) or its name (CNAME).
fn resolve_target(
    container: &ContainerInfo,
    record_type: RecordType,
    target_label: Option<&String>,
    network_label: Option<&String>,
) -> Option<String> {
    if let Some(target) = target_label {
        match record_type {
            RecordType::A => {
                if target.parse::<Ipv4Addr>().is_err() {
                    warn!(container = %container.name, target = %target, "A target is not an IPv4 literal, dropping");
                    return None;
                }
            }
            RecordType::Cname => {
                if !is_valid_dns_name(target) {
                    warn!(container = %container.name, target = %target, "CNAME target is not a valid name, dropping");
                    return None;
                }
            }
        }
        return Some(target.clone());
    }

    match record_type {
        RecordType::Cname => Some(container.name.clone()),
        RecordType::A => {
            let network = match network_label {
                Some(name) => match container.networks.iter().find(|n| &n.name == name) {
                    Some(n) => n,
                    None => {
                        warn!(container = %container.name, network = %name, "labelled network not attached, dropping");
                        return None;
                    }
                },
                None => match container.networks.len() {
                    0 => {
                        warn!(container = %container.name, "no attached networks, dropping");
                        return None;
                    }
                    1 => &container.networks[0],
                    // Network ordering is not stable across runtimes;
                    // refuse to guess.
                    _ => {
                        warn!(
                            container = %container.name,
                            "multiple networks attached and no target/network label, dropping"
                        );
                        return None;
                    }
                },
            };
            match network.ipv4 {
                Some(ip) if !ip.is_loopback() => Some(ip.to_string()),
                _ => {
                    warn!(container = %container.name, network = %network.name, "no usable IPv4 on network, dropping");
                    None
                }
            }
        }
    }
}

/// Deduplicate by key. Identical duplicates collapse; keys claimed with
/// conflicting shapes are dropped entirely and logged as errors.
fn dedup_endpoints(endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
    let mut by_key: HashMap<EndpointKey, Endpoint> = HashMap::new();
    let mut conflicted: HashSet<EndpointKey> = HashSet::new();

    for endpoint in endpoints {
        let key = endpoint.key();
        match by_key.get(&key) {
            Some(existing) if existing.needs_update(&endpoint) => {
                error!(
                    name = %key.0,
                    record_type = %key.1,
                    "conflicting containers request the same record with different shapes, dropping both"
                );
                conflicted.insert(key);
            }
            Some(_) => {}
            None => {
                by_key.insert(key, endpoint);
            }
        }
    }

    for key in &conflicted {
        by_key.remove(key);
    }

    let mut result: Vec<Endpoint> = by_key.into_values().collect();
    result.sort_by(|a, b| a.key().cmp(&b.key()));
    result
}

/// Validate an FQDN that may begin with a `*.` wildcard label.
fn is_valid_dns_name(name: &str) -> bool {
    let rest = name.strip_prefix("*.").unwrap_or(name);
    if rest.is_empty() || rest.len() > 253 || !rest.contains('.') || rest.contains('*') {
        return false;
    }
    rest.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(name: &str, labels: &[(&str, &str)]) -> ContainerInfo {
        ContainerInfo {
            id: format!("{name}-id"),
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            networks: vec![ContainerNetwork {
                name: "bridge".to_string(),
                ipv4: Some("172.17.0.2".parse().unwrap()),
            }],
        }
    }

    fn project(c: &ContainerInfo) -> Vec<Endpoint> {
        project_container(c, "sherpa.dns", false)
    }

    #[test]
    fn test_container_without_hostname_produces_nothing() {
        let c = container("web", &[("other.label", "x")]);
        assert!(project(&c).is_empty());
    }

    #[test]
    fn test_basic_a_record_from_network() {
        let c = container("web", &[("sherpa.dns/hostname", "app.example.com")]);
        let eps = project(&c);
        assert_eq!(eps.len(), 1);
        assert_eq!(eps[0].dns_name, "app.example.com");
        assert_eq!(eps[0].record_type, RecordType::A);
        assert_eq!(eps[0].targets, vec!["172.17.0.2".to_string()]);
        assert_eq!(eps[0].ttl, TTL_AUTO);
        assert!(!eps[0].proxied);
        assert_eq!(eps[0].source_ref.as_ref().unwrap().id, "web-id");
    }

    #[test]
    fn test_explicit_target_wins_over_network() {
        let c = container(
            "web",
            &[
                ("sherpa.dns/hostname", "app.example.com"),
                ("sherpa.dns/target", "10.0.0.5"),
            ],
        );
        assert_eq!(project(&c)[0].targets, vec!["10.0.0.5".to_string()]);
    }

    #[test]
    fn test_invalid_a_target_drops_endpoint() {
        let c = container(
            "web",
            &[
                ("sherpa.dns/hostname", "app.example.com"),
                ("sherpa.dns/target", "not-an-ip"),
            ],
        );
        assert!(project(&c).is_empty());
    }

    #[test]
    fn test_cname_defaults_to_container_name() {
        let c = container(
            "web",
            &[
                ("sherpa.dns/hostname", "alias.example.com"),
                ("sherpa.dns/type", "CNAME"),
            ],
        );
        let eps = project(&c);
        assert_eq!(eps[0].record_type, RecordType::Cname);
        assert_eq!(eps[0].targets, vec!["web".to_string()]);
    }

    #[test]
    fn test_unsupported_type_drops_endpoint() {
        let c = container(
            "web",
            &[
                ("sherpa.dns/hostname", "app.example.com"),
                ("sherpa.dns/type", "MX"),
            ],
        );
        assert!(project(&c).is_empty());
    }

    #[test]
    fn test_ttl_and_proxied_labels() {
        let c = container(
            "web",
            &[
                ("sherpa.dns/hostname", "app.example.com"),
                ("sherpa.dns/ttl", "300"),
                ("sherpa.dns/proxied", "true"),
            ],
        );
        let eps = project(&c);
        assert_eq!(eps[0].ttl, 300);
        assert!(eps[0].proxied);
    }

    #[test]
    fn test_invalid_ttl_drops_endpoint() {
        let c = container(
            "web",
            &[
                ("sherpa.dns/hostname", "app.example.com"),
                ("sherpa.dns/ttl", "0"),
            ],
        );
        assert!(project(&c).is_empty());
    }

    #[test]
    fn test_comma_separated_hostnames() {
        let c = container(
            "web",
            &[("sherpa.dns/hostname", "a.example.com, b.example.com")],
        );
        let eps = project(&c);
        assert_eq!(eps.len(), 2);
        assert_eq!(eps[0].dns_name, "a.example.com");
        assert_eq!(eps[1].dns_name, "b.example.com");
    }

    #[test]
    fn test_wildcard_hostname_is_legal() {
        let c = container("web", &[("sherpa.dns/hostname", "*.lab.example.com")]);
        assert_eq!(project(&c)[0].dns_name, "*.lab.example.com");
    }

    #[test]
    fn test_invalid_hostname_dropped() {
        let c = container("web", &[("sherpa.dns/hostname", "not_a_host..example")]);
        assert!(project(&c).is_empty());
    }

    #[test]
    fn test_multiple_networks_without_selector_drops() {
        let mut c = container("web", &[("sherpa.dns/hostname", "app.example.com")]);
        c.networks.push(ContainerNetwork {
            name: "backend".to_string(),
            ipv4: Some("10.5.0.2".parse().unwrap()),
        });
        assert!(project(&c).is_empty());
    }

    #[test]
    fn test_network_label_selects_network() {
        let mut c = container(
            "web",
            &[
                ("sherpa.dns/hostname", "app.example.com"),
                ("sherpa.dns/network", "backend"),
            ],
        );
        c.networks.push(ContainerNetwork {
            name: "backend".to_string(),
            ipv4: Some("10.5.0.2".parse().unwrap()),
        });
        assert_eq!(project(&c)[0].targets, vec!["10.5.0.2".to_string()]);
    }

    #[test]
    fn test_loopback_ipv4_is_rejected() {
        let mut c = container("web", &[("sherpa.dns/hostname", "app.example.com")]);
        c.networks[0].ipv4 = Some("127.0.0.1".parse().unwrap());
        assert!(project(&c).is_empty());
    }

    #[test]
    fn test_dedup_identical_duplicates_collapse() {
        let a = Endpoint::new("app.example.com", RecordType::A, vec!["10.0.0.5".into()]);
        let b = a.clone();
        assert_eq!(dedup_endpoints(vec![a, b]).len(), 1);
    }

    #[test]
    fn test_dedup_conflicting_duplicates_drop_both() {
        let a = Endpoint::new("app.example.com", RecordType::A, vec!["10.0.0.5".into()]);
        let b = Endpoint::new("app.example.com", RecordType::A, vec!["10.0.0.6".into()]);
        assert!(dedup_endpoints(vec![a, b]).is_empty());
    }

    #[test]
    fn test_dedup_conflict_does_not_affect_other_keys() {
        let a = Endpoint::new("app.example.com", RecordType::A, vec!["10.0.0.5".into()]);
        let b = Endpoint::new("app.example.com", RecordType::A, vec!["10.0.0.6".into()]);
        let c = Endpoint::new("db.example.com", RecordType::A, vec!["10.0.0.7".into()]);
        let out = dedup_endpoints(vec![a, b, c]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].dns_name, "db.example.com");
    }

    #[test]
    fn test_label_filter_parse() {
        assert!(LabelFilter::parse("").is_none());
        let presence = LabelFilter::parse("managed").unwrap();
        let matched = LabelFilter::parse("env=prod").unwrap();

        let mut labels = HashMap::new();
        labels.insert("managed".to_string(), "anything".to_string());
        labels.insert("env".to_string(), "prod".to_string());
        assert!(presence.matches(&labels));
        assert!(matched.matches(&labels));

        labels.insert("env".to_string(), "dev".to_string());
        assert!(!matched.matches(&labels));
    }

    #[test]
    fn test_is_valid_dns_name() {
        assert!(is_valid_dns_name("app.example.com"));
        assert!(is_valid_dns_name("*.lab.example.com"));
        assert!(!is_valid_dns_name("bare"));
        assert!(!is_valid_dns_name("under_score.example.com"));
        assert!(!is_valid_dns_name("double..dot.example.com"));
        assert!(!is_valid_dns_name("-leading.example.com"));
        assert!(!is_valid_dns_name("a.*.example.com"));
        assert!(!is_valid_dns_name(""));
    }
}
