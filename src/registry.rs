//! TXT-sidecar ownership registry.
//!
//! Turns an unowned DNS zone into an owned subset without external storage:
//! every primary A/CNAME this instance manages is accompanied by a TXT
//! record whose name derives from the primary's name and whose content
//! carries `heritage=sherpa-dns,owner=<owner_id>,type=<A|CNAME>`. Records
//! without a decodable sidecar for this owner are foreign and invisible to
//! the planner; they are never mutated.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::crypto::PayloadCipher;
use crate::endpoint::{zone_for_name, Endpoint, EndpointKey, ProviderRecord, RecordType, Zone};
use crate::error::SherpaError;
use crate::metrics;
use crate::plan::Plan;
use crate::provider::{Provider, ProviderError, RecordSpec};

/// Literal token that must appear in every sidecar payload.
const HERITAGE: &str = "sherpa-dns";

/// Outcome of one `apply` pass. Failed changes stay counted here and are
/// retried naturally on the next tick when their inputs persist.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplySummary {
    /// Endpoints fully created (primaries plus sidecar).
    pub created: usize,
    /// Endpoints whose primaries were rewritten.
    pub updated: usize,
    /// Endpoints fully deleted.
    pub deleted: usize,
    /// Changes that hit at least one provider error.
    pub failed: usize,
}

/// Ownership metadata decoded from a sidecar payload.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SidecarMeta {
    owner: String,
    record_type: Option<RecordType>,
    ttl: Option<u32>,
}

/// Location of one provider record, remembered between `owned` and `apply`
/// within a tick.
#[derive(Debug, Clone)]
struct RecordRef {
    zone_id: String,
    record_id: String,
    content: String,
    ttl: u32,
    proxied: bool,
}

/// Per-tick view of the provider state, rebuilt by every `owned` call.
#[derive(Debug, Default)]
struct TickIndex {
    zones: Vec<Zone>,
    primaries: HashMap<EndpointKey, Vec<RecordRef>>,
    sidecars: HashMap<String, RecordRef>,
    orphan_sidecars: Vec<RecordRef>,
    /// A/CNAME rows without a sidecar. Left alone unless a desired
    /// endpoint matches them exactly, in which case they are adopted by
    /// writing only the sidecar.
    unowned: HashMap<EndpointKey, Vec<RecordRef>>,
}

/// Registry that encodes ownership in TXT sidecar records.
pub struct TxtRegistry {
    provider: Arc<dyn Provider>,
    txt_prefix: String,
    owner_id: String,
    wildcard_replacement: String,
    cipher: Option<PayloadCipher>,
    index: Mutex<TickIndex>,
}

impl TxtRegistry {
    /// Build a registry over `provider` from its configuration section.
    pub fn new(provider: Arc<dyn Provider>, config: &RegistryConfig) -> Result<Self, SherpaError> {
        let cipher = if config.encrypt_txt {
            let key = config.encryption_key.as_deref().ok_or_else(|| {
                SherpaError::Config("encrypt_txt requires registry.encryption_key".into())
            })?;
            Some(PayloadCipher::new(key))
        } else {
            None
        };

        Ok(Self {
            provider,
            txt_prefix: config.txt_prefix.clone(),
            owner_id: config.txt_owner_id.clone(),
            wildcard_replacement: config.txt_wildcard_replacement.clone(),
            cipher,
            index: Mutex::new(TickIndex::default()),
        })
    }

    /// Derive the sidecar name for a primary name: replace any `*` label
    /// with the wildcard replacement, then prepend the prefix to the
    /// leftmost label.
    pub fn sidecar_name(&self, dns_name: &str) -> String {
        let replaced = dns_name
            .split('.')
            .map(|label| {
                if label == "*" {
                    self.wildcard_replacement.as_str()
                } else {
                    label
                }
            })
            .collect::<Vec<_>>()
            .join(".");
        format!("{}{}", self.txt_prefix, replaced).to_ascii_lowercase()
    }

    /// Invert [`Self::sidecar_name`]: recover the primary name a sidecar
    /// belongs to. Returns `None` when the name does not carry the prefix.
    ///
    /// Only an identity inverse when the wildcard replacement does not
    /// occur as a legal leading label in managed names.
    pub fn primary_name(&self, sidecar_name: &str) -> Option<String> {
        let lowered = sidecar_name.to_ascii_lowercase();
        let stripped = lowered.strip_prefix(&self.txt_prefix.to_ascii_lowercase())?;
        Some(
            stripped
                .split('.')
                .map(|label| {
                    if label == self.wildcard_replacement {
                        "*"
                    } else {
                        label
                    }
                })
                .collect::<Vec<_>>()
                .join("."),
        )
    }

    /// Build the on-wire sidecar content for an endpoint, quoted and
    /// optionally encrypted.
    fn sidecar_content(&self, record_type: RecordType) -> String {
        let payload = format!(
            "heritage={HERITAGE},owner={},type={}",
            self.owner_id, record_type
        );
        let payload = match &self.cipher {
            Some(cipher) => cipher.encrypt(&payload),
            None => payload,
        };
        format!("\"{payload}\"")
    }

    /// Decode a sidecar payload. `None` means the record is foreign:
    /// missing heritage token, undecryptable, or unparsable.
    fn parse_sidecar(&self, raw: &str) -> Option<SidecarMeta> {
        let unquoted = raw.trim().trim_matches('"');
        let plain = match &self.cipher {
            Some(cipher) => cipher.decrypt(unquoted)?,
            None => unquoted.to_string(),
        };

        let mut fields: HashMap<&str, &str> = HashMap::new();
        for part in plain.split(',') {
            if let Some((k, v)) = part.split_once('=') {
                fields.insert(k.trim(), v.trim());
            }
        }

        if fields.get("heritage").copied() != Some(HERITAGE) {
            return None;
        }

        Some(SidecarMeta {
            owner: fields.get("owner").copied().unwrap_or_default().to_string(),
            record_type: fields.get("type").and_then(|t| t.parse().ok()),
            ttl: fields.get("ttl").map(|t| match *t {
                "auto" => crate::endpoint::TTL_AUTO,
                other => other.parse().unwrap_or(crate::endpoint::TTL_AUTO),
            }),
        })
    }

    /// List every endpoint this instance owns.
    ///
    /// Walks all managed zones, pairs primary rows with their sidecars,
    /// groups A fan-out rows by `(name, type)`, and skips anything without
    /// a decodable sidecar stamped with this instance's owner id. Sidecars
    /// that match no primary are remembered and garbage-collected on the
    /// next `apply`.
    pub async fn owned(&self) -> Result<Vec<Endpoint>, ProviderError> {
        let zones = self.provider.zones().await?;
        let mut index = TickIndex {
            zones: zones.clone(),
            ..Default::default()
        };
        let mut endpoints = Vec::new();

        for zone in &zones {
            let records = self.provider.records(zone).await?;

            // Sidecars owned by this instance, by lowercased name.
            let mut sidecars: HashMap<String, (RecordRef, SidecarMeta)> = HashMap::new();
            for record in records.iter().filter(|r| r.record_type == "TXT") {
                let Some(meta) = self.parse_sidecar(&record.content) else {
                    continue;
                };
                if meta.owner != self.owner_id {
                    debug!(name = %record.name, owner = %meta.owner, "sidecar has another owner");
                    continue;
                }
                sidecars.insert(record.name.to_ascii_lowercase(), (record_ref(record), meta));
            }

            // Primary rows grouped by key; BTreeMap keeps output ordering
            // deterministic.
            let mut groups: BTreeMap<EndpointKey, Vec<&ProviderRecord>> = BTreeMap::new();
            for record in &records {
                let Ok(record_type) = record.record_type.parse::<RecordType>() else {
                    continue;
                };
                groups
                    .entry((record.name.to_ascii_lowercase(), record_type))
                    .or_default()
                    .push(record);
            }

            let mut used_sidecars: HashSet<String> = HashSet::new();
            for ((name, record_type), rows) in groups {
                let sidecar_name = self.sidecar_name(&name);
                let Some((sidecar_ref, meta)) = sidecars.get(&sidecar_name) else {
                    debug!(%name, %record_type, "record has no sidecar, treating as foreign");
                    index.unowned.insert(
                        (name.clone(), record_type),
                        rows.iter().map(|r| record_ref(r)).collect(),
                    );
                    continue;
                };
                if meta.record_type.is_some_and(|t| t != record_type) {
                    debug!(%name, %record_type, "sidecar claims a different record type");
                    continue;
                }
                used_sidecars.insert(sidecar_name.clone());

                let first = rows[0];
                let endpoint = Endpoint {
                    dns_name: name.clone(),
                    record_type,
                    targets: rows.iter().map(|r| r.content.clone()).collect(),
                    ttl: meta.ttl.unwrap_or(first.ttl),
                    proxied: first.proxied,
                    owner_id: Some(self.owner_id.clone()),
                    source_ref: None,
                };
                index
                    .primaries
                    .insert(endpoint.key(), rows.iter().map(|r| record_ref(r)).collect());
                index
                    .sidecars
                    .insert(sidecar_name, sidecar_ref.clone());
                endpoints.push(endpoint);
            }

            for (name, (sidecar_ref, _)) in sidecars {
                if !used_sidecars.contains(&name) {
                    debug!(sidecar = %name, "orphan sidecar queued for garbage collection");
                    index.orphan_sidecars.push(sidecar_ref);
                }
            }
        }

        *self.index.lock() = index;
        Ok(endpoints)
    }

    /// Apply a plan: for each change mutate the primary records and the
    /// matching sidecar in the order the ownership invariant requires.
    /// Per-change failures are logged and counted; the rest of the plan
    /// still proceeds.
    pub async fn apply(&self, plan: &Plan) -> ApplySummary {
        let mut summary = ApplySummary::default();
        let (zones, orphans) = {
            let mut index = self.index.lock();
            (index.zones.clone(), std::mem::take(&mut index.orphan_sidecars))
        };

        for endpoint in &plan.creates {
            match self.create_endpoint(&zones, endpoint).await {
                Ok(()) => {
                    summary.created += 1;
                    metrics::record_change("create");
                }
                Err(e) => {
                    summary.failed += 1;
                    self.log_change_error("create", endpoint, &e);
                }
            }
        }

        for endpoint in &plan.updates {
            match self.update_endpoint(&zones, endpoint).await {
                Ok(()) => {
                    summary.updated += 1;
                    metrics::record_change("update");
                }
                Err(e) => {
                    summary.failed += 1;
                    self.log_change_error("update", endpoint, &e);
                }
            }
        }

        for endpoint in &plan.deletes {
            match self.delete_endpoint(endpoint).await {
                Ok(()) => {
                    summary.deleted += 1;
                    metrics::record_change("delete");
                }
                Err(e) => {
                    summary.failed += 1;
                    self.log_change_error("delete", endpoint, &e);
                }
            }
        }

        for orphan in orphans {
            match self
                .provider
                .delete_record(&orphan.zone_id, &orphan.record_id)
                .await
            {
                Ok(()) => info!(content = %orphan.content, "garbage-collected orphan sidecar"),
                Err(e) => {
                    metrics::record_provider_error(e.class_label());
                    warn!(error = %e, "failed to delete orphan sidecar");
                }
            }
        }

        summary
    }

    fn log_change_error(&self, kind: &str, endpoint: &Endpoint, error: &ProviderError) {
        metrics::record_provider_error(error.class_label());
        match error.class() {
            crate::provider::ErrorClass::Permanent => {
                tracing::error!(endpoint = %endpoint, error = %error, "{kind} failed permanently, dropping for this tick");
            }
            _ => {
                warn!(endpoint = %endpoint, error = %error, "{kind} failed, will retry next tick");
            }
        }
    }

    /// Create: write the primaries, then the sidecar.
    ///
    /// Primary rows that already exist without a sidecar and match a
    /// desired target exactly are adopted: only the sidecar is written.
    async fn create_endpoint(
        &self,
        zones: &[Zone],
        endpoint: &Endpoint,
    ) -> Result<(), ProviderError> {
        let Some(zone) = zone_for_name(zones, &endpoint.dns_name) else {
            warn!(endpoint = %endpoint, "no managed zone contains this name, skipping");
            return Ok(());
        };

        let adoptable: HashSet<String> = self
            .index
            .lock()
            .unowned
            .get(&endpoint.key())
            .map(|rows| rows.iter().map(|r| r.content.clone()).collect())
            .unwrap_or_default();

        for target in &endpoint.targets {
            if adoptable.contains(target) {
                info!(endpoint = %endpoint, target = %target, "adopting existing record");
                continue;
            }
            self.provider
                .create_record(zone, &primary_spec(endpoint, target))
                .await?;
        }

        self.provider
            .create_record(
                zone,
                &RecordSpec {
                    name: self.sidecar_name(&endpoint.dns_name),
                    record_type: "TXT".to_string(),
                    content: self.sidecar_content(endpoint.record_type),
                    ttl: crate::endpoint::TTL_AUTO,
                    proxied: false,
                },
            )
            .await?;

        info!(endpoint = %endpoint, "created endpoint");
        Ok(())
    }

    /// Update: rewrite the primaries in place; the sidecar stays untouched
    /// (type is part of the key and cannot change within an update).
    async fn update_endpoint(
        &self,
        zones: &[Zone],
        endpoint: &Endpoint,
    ) -> Result<(), ProviderError> {
        let refs = self.index.lock().primaries.get(&endpoint.key()).cloned();
        let Some(refs) = refs else {
            // The records vanished between read and apply; converge by
            // creating instead.
            warn!(endpoint = %endpoint, "update target missing, creating instead");
            return self.create_endpoint(zones, endpoint).await;
        };

        let desired: HashSet<&str> = endpoint.targets.iter().map(String::as_str).collect();
        let current: HashSet<&str> = refs.iter().map(|r| r.content.as_str()).collect();

        let mut stale: Vec<&RecordRef> =
            refs.iter().filter(|r| !desired.contains(r.content.as_str())).collect();
        let mut missing: Vec<&String> = endpoint
            .targets
            .iter()
            .filter(|t| !current.contains(t.as_str()))
            .collect();

        // Pair one stale row with one missing target and rewrite in place;
        // leftovers become plain deletes or creates.
        let pairs = stale.len().min(missing.len());
        for (record, target) in stale.drain(..pairs).zip(missing.drain(..pairs)) {
            self.provider
                .update_record(
                    &record.zone_id,
                    &record.record_id,
                    &primary_spec(endpoint, target),
                )
                .await?;
        }
        for record in stale {
            self.provider
                .delete_record(&record.zone_id, &record.record_id)
                .await?;
        }
        if !missing.is_empty() {
            let Some(zone) = zone_for_name(zones, &endpoint.dns_name) else {
                warn!(endpoint = %endpoint, "no managed zone contains this name, skipping");
                return Ok(());
            };
            for target in missing {
                self.provider
                    .create_record(zone, &primary_spec(endpoint, target))
                    .await?;
            }
        }

        // Rows whose target is unchanged still need a rewrite when only
        // ttl/proxied moved.
        for record in refs
            .iter()
            .filter(|r| desired.contains(r.content.as_str()))
            .filter(|r| r.ttl != endpoint.ttl || r.proxied != endpoint.proxied)
        {
            self.provider
                .update_record(
                    &record.zone_id,
                    &record.record_id,
                    &primary_spec(endpoint, &record.content),
                )
                .await?;
        }

        info!(endpoint = %endpoint, "updated endpoint");
        Ok(())
    }

    /// Delete: remove the primaries first, then the sidecar.
    async fn delete_endpoint(&self, endpoint: &Endpoint) -> Result<(), ProviderError> {
        let sidecar_name = self.sidecar_name(&endpoint.dns_name);
        let (refs, sidecar) = {
            let index = self.index.lock();
            (
                index.primaries.get(&endpoint.key()).cloned(),
                index.sidecars.get(&sidecar_name).cloned(),
            )
        };

        match refs {
            Some(refs) => {
                for record in refs {
                    self.provider
                        .delete_record(&record.zone_id, &record.record_id)
                        .await?;
                }
            }
            None => {
                warn!(endpoint = %endpoint, "delete target already gone");
            }
        }

        if let Some(sidecar) = sidecar {
            self.provider
                .delete_record(&sidecar.zone_id, &sidecar.record_id)
                .await?;
        }

        info!(endpoint = %endpoint, "deleted endpoint");
        Ok(())
    }
}

fn record_ref(record: &ProviderRecord) -> RecordRef {
    RecordRef {
        zone_id: record.zone_id.clone(),
        record_id: record.id.clone(),
        content: record.content.clone(),
        ttl: record.ttl,
        proxied: record.proxied,
    }
}

fn primary_spec(endpoint: &Endpoint, target: &str) -> RecordSpec {
    RecordSpec {
        name: endpoint.dns_name.clone(),
        record_type: endpoint.record_type.to_string(),
        content: target.to_string(),
        ttl: endpoint.ttl,
        proxied: endpoint.proxied,
    }
}
