//! Shared test infrastructure for reconciliation integration tests.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, BoxStream};

use sherpa_dns::config::{ControllerConfig, RegistryConfig, SourceConfig};
use sherpa_dns::controller::Controller;
use sherpa_dns::domain_filter::DomainFilter;
use sherpa_dns::endpoint::{ProviderRecord, Zone, TTL_AUTO};
use sherpa_dns::error::SherpaError;
use sherpa_dns::health::HealthState;
use sherpa_dns::provider::{Provider, ProviderError, RecordSpec};
use sherpa_dns::registry::TxtRegistry;
use sherpa_dns::source::{
    ContainerEvent, ContainerInfo, ContainerNetwork, ContainerRuntime, ContainerSource,
};

// --- Constants ---

pub const ZONE_ID: &str = "zone-1";
pub const ZONE_NAME: &str = "example.com";

// --- RecordingProvider ---

/// One mutating provider call, for assertions on exactly which API traffic
/// a tick produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create {
        zone_id: String,
        record: RecordSpec,
    },
    Update {
        record_id: String,
        record: RecordSpec,
    },
    Delete {
        record_id: String,
    },
}

/// In-memory provider that records every mutating call and actually applies
/// it to its stored records, so consecutive ticks observe the effects.
pub struct RecordingProvider {
    filter: DomainFilter,
    zones: Vec<Zone>,
    records: Mutex<Vec<ProviderRecord>>,
    calls: Mutex<Vec<Call>>,
    next_id: AtomicUsize,
    fail_reads: AtomicBool,
}

impl RecordingProvider {
    pub fn new(zones: &[(&str, &str)], filter: DomainFilter) -> Self {
        Self {
            filter,
            zones: zones
                .iter()
                .map(|(id, name)| Zone {
                    id: id.to_string(),
                    name: name.to_string(),
                })
                .collect(),
            records: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Default single-zone provider with an open domain filter.
    pub fn single_zone() -> Self {
        Self::new(&[(ZONE_ID, ZONE_NAME)], DomainFilter::default())
    }

    fn fresh_id(&self) -> String {
        format!("r{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Insert a record directly, bypassing the call log (test seeding).
    pub fn seed_record(
        &self,
        zone_id: &str,
        name: &str,
        record_type: &str,
        content: &str,
        ttl: u32,
        proxied: bool,
    ) -> String {
        let id = self.fresh_id();
        self.records.lock().unwrap().push(ProviderRecord {
            id: id.clone(),
            zone_id: zone_id.to_string(),
            name: name.to_string(),
            record_type: record_type.to_string(),
            content: content.to_string(),
            ttl,
            proxied,
        });
        id
    }

    /// Seed an owned A endpoint: primary rows plus a plaintext sidecar.
    pub fn seed_owned_a(&self, name: &str, targets: &[&str]) {
        for target in targets {
            self.seed_record(ZONE_ID, name, "A", target, TTL_AUTO, false);
        }
        self.seed_record(
            ZONE_ID,
            &format!("sherpa-dns-{name}"),
            "TXT",
            "\"heritage=sherpa-dns,owner=default,type=A\"",
            TTL_AUTO,
            false,
        );
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// `(name, type, content)` triples currently stored, sorted.
    pub fn stored(&self) -> Vec<(String, String, String)> {
        let mut rows: Vec<(String, String, String)> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.name.clone(), r.record_type.clone(), r.content.clone()))
            .collect();
        rows.sort();
        rows
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    async fn zones(&self) -> Result<Vec<Zone>, ProviderError> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(ProviderError::Api {
                status: 503,
                message: "injected read failure".to_string(),
            });
        }
        Ok(self
            .zones
            .iter()
            .filter(|z| self.filter.matches(&z.name))
            .cloned()
            .collect())
    }

    async fn records(&self, zone: &Zone) -> Result<Vec<ProviderRecord>, ProviderError> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(ProviderError::Api {
                status: 503,
                message: "injected read failure".to_string(),
            });
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.zone_id == zone.id)
            .cloned()
            .collect())
    }

    async fn create_record(
        &self,
        zone: &Zone,
        record: &RecordSpec,
    ) -> Result<String, ProviderError> {
        let id = self.fresh_id();
        self.records.lock().unwrap().push(ProviderRecord {
            id: id.clone(),
            zone_id: zone.id.clone(),
            name: record.name.clone(),
            record_type: record.record_type.clone(),
            content: record.content.clone(),
            ttl: record.ttl,
            proxied: record.proxied,
        });
        self.calls.lock().unwrap().push(Call::Create {
            zone_id: zone.id.clone(),
            record: record.clone(),
        });
        Ok(id)
    }

    async fn update_record(
        &self,
        _zone_id: &str,
        record_id: &str,
        record: &RecordSpec,
    ) -> Result<(), ProviderError> {
        let mut records = self.records.lock().unwrap();
        let row = records
            .iter_mut()
            .find(|r| r.id == record_id)
            .ok_or(ProviderError::Api {
                status: 404,
                message: "record not found".to_string(),
            })?;
        row.name = record.name.clone();
        row.record_type = record.record_type.clone();
        row.content = record.content.clone();
        row.ttl = record.ttl;
        row.proxied = record.proxied;
        drop(records);
        self.calls.lock().unwrap().push(Call::Update {
            record_id: record_id.to_string(),
            record: record.clone(),
        });
        Ok(())
    }

    async fn delete_record(&self, _zone_id: &str, record_id: &str) -> Result<(), ProviderError> {
        self.records.lock().unwrap().retain(|r| r.id != record_id);
        self.calls.lock().unwrap().push(Call::Delete {
            record_id: record_id.to_string(),
        });
        Ok(())
    }
}

// --- MockRuntime ---

/// Scriptable container runtime.
pub struct MockRuntime {
    containers: Mutex<Vec<ContainerInfo>>,
    fail: AtomicBool,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_containers(&self, containers: Vec<ContainerInfo>) {
        *self.containers.lock().unwrap() = containers;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.fail.store(unreachable, Ordering::Relaxed);
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, SherpaError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(SherpaError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "runtime unreachable",
            )));
        }
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn subscribe_events<'a>(
        &'a self,
    ) -> Result<BoxStream<'a, Result<ContainerEvent, SherpaError>>, SherpaError> {
        Ok(Box::pin(stream::pending()))
    }
}

// --- Container fixtures ---

/// Build a container with one bridge network and the given labels.
pub fn container(name: &str, labels: &[(&str, &str)]) -> ContainerInfo {
    container_with_ip(name, labels, "172.17.0.2")
}

pub fn container_with_ip(name: &str, labels: &[(&str, &str)], ip: &str) -> ContainerInfo {
    ContainerInfo {
        id: format!("{name}-id"),
        name: name.to_string(),
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
        networks: vec![ContainerNetwork {
            name: "bridge".to_string(),
            ipv4: Some(ip.parse::<Ipv4Addr>().unwrap()),
        }],
    }
}

/// Labels for a plain A endpoint with an explicit target.
pub fn a_labels(hostname: &str, target: &str) -> Vec<(String, String)> {
    vec![
        ("sherpa.dns/hostname".to_string(), hostname.to_string()),
        ("sherpa.dns/target".to_string(), target.to_string()),
    ]
}

pub fn container_a(name: &str, hostname: &str, target: &str) -> ContainerInfo {
    let labels = a_labels(hostname, target);
    let labels: Vec<(&str, &str)> = labels
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    container(name, &labels)
}

// --- Harness ---

/// A controller wired to a recording provider and a scriptable runtime.
pub struct Harness {
    pub provider: Arc<RecordingProvider>,
    pub runtime: Arc<MockRuntime>,
    pub controller: Controller,
    pub health: HealthState,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Build a harness, letting the test adjust the controller section.
    pub fn with_config(configure: impl FnOnce(&mut ControllerConfig)) -> Self {
        Self::build(Arc::new(RecordingProvider::single_zone()), configure)
    }

    pub fn with_provider(
        provider: Arc<RecordingProvider>,
        configure: impl FnOnce(&mut ControllerConfig),
    ) -> Self {
        Self::build(provider, configure)
    }

    fn build(
        provider: Arc<RecordingProvider>,
        configure: impl FnOnce(&mut ControllerConfig),
    ) -> Self {
        let runtime = Arc::new(MockRuntime::new());

        let mut controller_config = ControllerConfig::default();
        configure(&mut controller_config);

        let registry = TxtRegistry::new(
            provider.clone() as Arc<dyn Provider>,
            &RegistryConfig::default(),
        )
        .expect("registry construction");
        let source = ContainerSource::new(
            runtime.clone() as Arc<dyn ContainerRuntime>,
            &SourceConfig::default(),
            false,
        );

        let health = HealthState::new();
        let controller = Controller::new(source, registry, &controller_config, health.clone());

        Self {
            provider,
            runtime,
            controller,
            health,
        }
    }
}
