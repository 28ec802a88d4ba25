//! Registry Bridge Types
//!
//! Core types for representing instances on both sides of the bridge,
//! the provenance marker, and per-pass outcome records.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Metadata key carrying the provenance marker inside a registered instance.
pub const ORIGIN_METADATA_KEY: &str = "discoveryClient";

/// Separator between an optional group/namespace prefix and the service name.
const GROUP_SEPARATOR: char = '@';

/// Canonical service name: the segment after the last group separator,
/// upper-cased. Idempotent; a name with no separator maps to its upper-cased
/// self.
pub fn canonical_name(raw: &str) -> String {
    raw.rsplit(GROUP_SEPARATOR)
        .next()
        .unwrap_or(raw)
        .to_uppercase()
}

/// Deterministic instance id used for all target-registry writes.
pub fn instance_id(canonical_name: &str, address: &InstanceAddress) -> String {
    format!("{}:{}:{}", canonical_name, address.host, address.port)
}

/// Which registry owns an instance's source of truth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Origin {
    /// Truth lives in the push/replicated target registry
    Target,
    /// Truth lives in the poll/subscribe source registry
    Source,
}

impl Origin {
    /// Wire value stored under [`ORIGIN_METADATA_KEY`]
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Target => "TARGET",
            Origin::Source => "SOURCE",
        }
    }

    /// Decode the provenance marker from instance metadata. Unknown values
    /// decode to `None`, the same as an absent marker.
    pub fn decode(metadata: &BTreeMap<String, String>) -> Option<Origin> {
        match metadata.get(ORIGIN_METADATA_KEY).map(String::as_str) {
            Some("TARGET") => Some(Origin::Target),
            Some("SOURCE") => Some(Origin::Source),
            _ => None,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the metadata with the bridge's provenance marker set, indicating
/// the instance was created from source-registry data. Pure and idempotent.
pub fn tag_as_bridged(mut metadata: BTreeMap<String, String>) -> BTreeMap<String, String> {
    metadata.insert(
        ORIGIN_METADATA_KEY.to_string(),
        Origin::Source.as_str().to_string(),
    );
    metadata
}

/// Instance status as understood by the target registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceStatus {
    Up,
    Down,
}

impl InstanceStatus {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            InstanceStatus::Up
        } else {
            InstanceStatus::Down
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Up => write!(f, "UP"),
            InstanceStatus::Down => write!(f, "DOWN"),
        }
    }
}

/// (host, port) identity used to match instances across registries
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceAddress {
    pub host: String,
    pub port: u16,
}

impl InstanceAddress {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }
}

impl fmt::Display for InstanceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Point-in-time snapshot of an instance as reported by the source registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInstance {
    /// Raw service name as the source registry reports it (may carry a
    /// group prefix)
    pub service_name: String,
    pub address: InstanceAddress,
    /// Whether the instance is enabled / accepting traffic
    pub enabled: bool,
    pub metadata: BTreeMap<String, String>,
    /// Last modification timestamp, epoch millis
    pub last_dirty_ms: i64,
    /// Provenance marker decoded from `metadata`, if any
    pub origin: Option<Origin>,
}

impl SourceInstance {
    /// Build a snapshot entry, decoding the provenance marker once.
    pub fn from_snapshot(
        service_name: &str,
        host: &str,
        port: u16,
        enabled: bool,
        metadata: BTreeMap<String, String>,
        last_dirty_ms: i64,
    ) -> Self {
        let origin = Origin::decode(&metadata);
        Self {
            service_name: service_name.to_string(),
            address: InstanceAddress::new(host, port),
            enabled,
            metadata,
            last_dirty_ms,
            origin,
        }
    }

    /// A native, untagged instance (the common case in tests and snapshots).
    pub fn native(service_name: &str, host: &str, port: u16, enabled: bool) -> Self {
        Self::from_snapshot(service_name, host, port, enabled, BTreeMap::new(), 0)
    }

    /// True when this snapshot entry is an echo of an instance whose truth
    /// lives in the target registry; the bridge must never act on it.
    ///
    /// An absent marker deliberately counts as native, so untagged instances
    /// remain bridgeable (see DESIGN.md).
    pub fn is_echo(&self) -> bool {
        match self.origin {
            Some(Origin::Target) => true,
            Some(Origin::Source) | None => false,
        }
    }
}

/// An instance as registered in (or destined for) the target registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetInstance {
    /// Canonical app name the instance is registered under
    pub app_name: String,
    /// Deterministic id, `{app}:{host}:{port}`
    pub instance_id: String,
    pub address: InstanceAddress,
    pub status: InstanceStatus,
    pub hostname: String,
    pub vip_address: String,
    pub secure_vip_address: String,
    pub metadata: BTreeMap<String, String>,
    pub last_dirty_ms: i64,
}

impl TargetInstance {
    /// Build the record the bridge registers for a native source instance:
    /// id and VIP addresses derive from the canonical name, metadata is
    /// copied with the bridged provenance marker set.
    pub fn bridged_from(source: &SourceInstance, canonical: &str) -> Self {
        Self {
            app_name: canonical.to_string(),
            instance_id: instance_id(canonical, &source.address),
            address: source.address.clone(),
            status: InstanceStatus::from_enabled(source.enabled),
            hostname: source.address.host.clone(),
            vip_address: canonical.to_string(),
            secure_vip_address: canonical.to_string(),
            metadata: tag_as_bridged(source.metadata.clone()),
            last_dirty_ms: source.last_dirty_ms,
        }
    }

    /// Provenance marker carried in this record's metadata, if any
    pub fn origin(&self) -> Option<Origin> {
        Origin::decode(&self.metadata)
    }
}

/// Push notification payload: one service's full instance snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceChange {
    /// Raw service name as delivered by the source registry
    pub service_name: String,
    pub instances: Vec<SourceInstance>,
}

/// Result of one full-scan reconciliation tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickSummary {
    /// Service names enumerated from the source registry
    pub services_seen: usize,
    /// Leases successfully renewed in the target registry
    pub renewals: usize,
    /// New subscriptions installed this tick
    pub subscriptions_added: usize,
    /// Per-service errors; a tick never fails as a whole
    pub errors: Vec<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl TickSummary {
    pub(crate) fn empty() -> Self {
        Self {
            services_seen: 0,
            renewals: 0,
            subscriptions_added: 0,
            errors: Vec::new(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Result of one event-driven diff-and-converge pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaOutcome {
    /// Canonical service name the pass converged
    pub service_name: String,
    pub registered: usize,
    pub deregistered: usize,
    pub status_updates: usize,
    /// Snapshot entries skipped because they were the bridge's own echoes
    pub skipped_echoes: usize,
    /// Per-instance errors; one instance never aborts the rest of the event
    pub errors: Vec<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl DeltaOutcome {
    pub(crate) fn empty(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            registered: 0,
            deregistered: 0,
            status_updates: 0,
            skipped_echoes: 0,
            errors: Vec::new(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Configuration for the reconciliation loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Delay before the first tick, in seconds
    pub initial_delay_secs: u64,
    /// Fixed delay between the end of one tick and the start of the next,
    /// in seconds
    pub period_secs: u64,
    /// Page size used when enumerating source-registry service names
    pub service_page_size: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 5,
            period_secs: 10,
            service_page_size: 1000,
        }
    }
}

impl BridgeConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}
