use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::update;

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(s: impl Into<String>) -> Self {
        DeviceId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PollerId(pub String);

impl PollerId {
    pub fn new(s: impl Into<String>) -> Self {
        PollerId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PollerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Enums ─────────────────────────────────────────────────────────────────────

/// Where a device observation originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSource {
    Sweep,
    Integration,
    Armis,
    Netbox,
    Snmp,
    SelfReported,
}

impl std::fmt::Display for DeviceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceSource::Sweep => write!(f, "sweep"),
            DeviceSource::Integration => write!(f, "integration"),
            DeviceSource::Armis => write!(f, "armis"),
            DeviceSource::Netbox => write!(f, "netbox"),
            DeviceSource::Snmp => write!(f, "snmp"),
            DeviceSource::SelfReported => write!(f, "self_reported"),
        }
    }
}

// ── Canonical device ──────────────────────────────────────────────────────────

/// A device row as owned by the storage engine. The core only ever holds
/// short-lived references to these; all mutation goes through device updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDevice {
    pub device_id: DeviceId,
    pub ip: String,
    pub hostname: Option<String>,
    pub mac: Option<String>,
    pub metadata: HashMap<String, String>,
    pub discovery_sources: Vec<DeviceSource>,
    pub modified_time: DateTime<Utc>,
}

impl CanonicalDevice {
    /// A device merged into another canonical. Skipped by the resolver
    /// unless explicitly requested.
    pub fn is_tombstoned(&self) -> bool {
        self.metadata.contains_key(update::MERGED_INTO)
    }

    pub fn is_soft_deleted(&self) -> bool {
        self.metadata
            .get(update::DELETED)
            .map_or(false, |v| v == "true")
    }

    /// The canonical this device was merged into, when tombstoned.
    pub fn merged_into(&self) -> Option<&str> {
        self.metadata.get(update::MERGED_INTO).map(|s| s.as_str())
    }
}
