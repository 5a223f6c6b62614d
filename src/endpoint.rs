//! Core data model: endpoints, zones, and provider records.
//!
//! An [`Endpoint`] is the unit of desired and observed DNS state, independent
//! of how any particular provider represents it. Identity for planning is the
//! `(dns_name, record_type)` pair; mutation is detected by comparing the
//! `(targets, ttl, proxied)` tuple.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// TTL sentinel meaning "let the provider pick" (Cloudflare: automatic).
pub const TTL_AUTO: u32 = 1;

/// Supported record types for managed endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordType {
    /// IPv4 address record.
    A,
    /// Canonical name record.
    Cname,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::Cname => write!(f, "CNAME"),
        }
    }
}

impl FromStr for RecordType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "CNAME" => Ok(RecordType::Cname),
            _ => Err(()),
        }
    }
}

/// Identifier of the container an endpoint was derived from.
///
/// Carried through planning so the cleanup scheduler can report which
/// container disappeared; never sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    /// Stable container id.
    pub id: String,
    /// Human-readable container name.
    pub name: String,
}

/// Planning identity of an endpoint: lowercased name plus record type.
pub type EndpointKey = (String, RecordType);

/// A desired or observed DNS record, independent of provider representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Fully qualified name, lowercased. May begin with `*.` (wildcard).
    pub dns_name: String,
    /// Record type.
    pub record_type: RecordType,
    /// Targets: IPv4 literals for A, a single FQDN for CNAME.
    pub targets: Vec<String>,
    /// TTL in seconds; [`TTL_AUTO`] means provider-automatic.
    pub ttl: u32,
    /// Provider-specific proxy knob; ignored by providers without it.
    pub proxied: bool,
    /// Owner stamp, set by the registry on read. Unset on source output.
    pub owner_id: Option<String>,
    /// Originating container, set by the source. Unset on registry output.
    pub source_ref: Option<SourceRef>,
}

impl Endpoint {
    /// Build an endpoint with the given identity and targets, TTL auto,
    /// unproxied.
    pub fn new(dns_name: impl Into<String>, record_type: RecordType, targets: Vec<String>) -> Self {
        Self {
            dns_name: dns_name.into().to_ascii_lowercase(),
            record_type,
            targets,
            ttl: TTL_AUTO,
            proxied: false,
            owner_id: None,
            source_ref: None,
        }
    }

    /// Planning key: `(dns_name lowercased, record_type)`.
    pub fn key(&self) -> EndpointKey {
        (self.dns_name.to_ascii_lowercase(), self.record_type)
    }

    /// True when the records behind `self` must be rewritten to match
    /// `desired`.
    ///
    /// Target comparison is set equality for A records and string equality
    /// for CNAME; TTL and proxied compare directly (the `1` sentinel is the
    /// same value on both sides).
    pub fn needs_update(&self, desired: &Endpoint) -> bool {
        if self.ttl != desired.ttl || self.proxied != desired.proxied {
            return true;
        }
        match self.record_type {
            RecordType::A => {
                let mut a = self.targets.clone();
                let mut b = desired.targets.clone();
                a.sort();
                b.sort();
                a != b
            }
            RecordType::Cname => self.targets != desired.targets,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> [{}] (ttl={}, proxied={})",
            self.record_type,
            self.dns_name,
            self.targets.join(", "),
            self.ttl,
            self.proxied
        )
    }
}

/// A DNS zone as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Zone {
    /// Provider-assigned zone id.
    pub id: String,
    /// Zone apex name, e.g. `example.com`.
    pub name: String,
}

/// A raw record row as returned by the provider, before the registry
/// groups fan-out rows and pairs primaries with sidecars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRecord {
    /// Provider-assigned record id.
    pub id: String,
    /// Zone the record lives in.
    pub zone_id: String,
    /// Fully qualified record name.
    pub name: String,
    /// Record type as the provider spells it (`A`, `CNAME`, `TXT`, ...).
    pub record_type: String,
    /// Record content: an address, a target name, or a quoted TXT payload.
    pub content: String,
    /// TTL in seconds, `1` meaning automatic.
    pub ttl: u32,
    /// Whether the record is proxied (false for providers without the knob).
    pub proxied: bool,
}

/// Select the zone whose name is the longest suffix of `dns_name`.
///
/// `*.lab.example.com` lies in `example.com` (and in `lab.example.com` if
/// that is a separate zone, which wins by length).
pub fn zone_for_name<'a>(zones: &'a [Zone], dns_name: &str) -> Option<&'a Zone> {
    let name = dns_name.trim_start_matches("*.").to_ascii_lowercase();
    zones
        .iter()
        .filter(|z| {
            let zn = z.name.to_ascii_lowercase();
            name == zn || name.ends_with(&format!(".{zn}"))
        })
        .max_by_key(|z| z.name.len())
}
