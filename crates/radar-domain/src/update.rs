use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DeviceId, DeviceSource};

// ── Well-known metadata keys ──────────────────────────────────────────────────

/// Points a merged duplicate at its canonical device.
pub const MERGED_INTO: &str = "_merged_into";
/// `"true"` on soft-deleted devices.
pub const DELETED: &str = "_deleted";
/// Comma-separated list of every IP the device has been seen under.
pub const ALL_IPS: &str = "all_ips";
/// Per-IP alias keys: `alt_ip:<ip>`.
pub const ALT_IP_PREFIX: &str = "alt_ip:";
/// Service id of the component that last reported this device's alias.
pub const ALIAS_LAST_SEEN_SERVICE_ID: &str = "_alias_last_seen_service_id";
pub const ARMIS_DEVICE_ID: &str = "armis_device_id";
pub const INTEGRATION_TYPE: &str = "integration_type";
pub const INTEGRATION_ID: &str = "integration_id";
pub const NETBOX_DEVICE_ID: &str = "netbox_device_id";
/// JSON-encoded vector of non-primary IPs collected from interfaces.
pub const ALTERNATE_IPS: &str = "alternate_ips";

// ── Device update ─────────────────────────────────────────────────────────────

/// The ingest atom: one observation of a device from one source.
///
/// Updates are append-only; a correction is a new update, never a mutation.
/// Tombstones are updates whose sole purpose is to redirect a merged
/// duplicate to its canonical via `_merged_into`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceUpdate {
    pub device_id: Option<DeviceId>,
    pub partition: String,
    pub ip: String,
    pub source: DeviceSource,
    pub timestamp: DateTime<Utc>,
    pub is_available: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub hostname: Option<String>,
    pub mac: Option<String>,
}

impl DeviceUpdate {
    /// Build a tombstone merging `device_id` into `canonical_id`.
    pub fn tombstone(device_id: DeviceId, canonical_id: &DeviceId) -> Self {
        let partition = crate::partition::partition_of(device_id.as_str()).to_string();
        let mut metadata = HashMap::new();
        metadata.insert(MERGED_INTO.to_string(), canonical_id.to_string());
        DeviceUpdate {
            device_id: Some(device_id),
            partition,
            ip: String::new(),
            source: DeviceSource::Integration,
            timestamp: Utc::now(),
            is_available: false,
            metadata,
            hostname: None,
            mac: None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        !self.is_available && self.metadata.contains_key(MERGED_INTO)
    }
}

// ── Lifecycle events ──────────────────────────────────────────────────────────

/// A device lifecycle event produced by diffing an incoming update against
/// the current canonical metadata (e.g. `alias_updated`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub action: String,
    pub reason: String,
    pub device_id: DeviceId,
    pub severity: String,
    pub level: u8,
    pub metadata: HashMap<String, String>,
}
