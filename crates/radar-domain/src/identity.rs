use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::DeviceId;

// ── Identity keys ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    DeviceId,
    PartitionIp,
    Ip,
    Mac,
    ArmisId,
    NetboxId,
    Unspecified,
}

impl std::fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IdentityKind::DeviceId => "device_id",
            IdentityKind::PartitionIp => "partition_ip",
            IdentityKind::Ip => "ip",
            IdentityKind::Mac => "mac",
            IdentityKind::ArmisId => "armis_id",
            IdentityKind::NetboxId => "netbox_id",
            IdentityKind::Unspecified => "unspecified",
        };
        write!(f, "{}", s)
    }
}

/// One lookup key for canonical resolution. Lookup order is caller-supplied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    pub kind: IdentityKind,
    pub value: String,
}

impl IdentityKey {
    pub fn new(kind: IdentityKind, value: impl Into<String>) -> Self {
        IdentityKey { kind, value: value.into() }
    }
}

/// Normalize a caller-supplied key list: drop empty/unspecified entries,
/// collapse duplicates preserving first-seen order, and append `ip_hint`
/// as an `Ip` key when it is not already present.
pub fn normalize_identity_keys(keys: &[IdentityKey], ip_hint: Option<&str>) -> Vec<IdentityKey> {
    let mut seen: HashSet<(IdentityKind, String)> = HashSet::new();
    let mut out = Vec::with_capacity(keys.len() + 1);

    for key in keys {
        if key.value.is_empty() || key.kind == IdentityKind::Unspecified {
            continue;
        }
        if seen.insert((key.kind, key.value.clone())) {
            out.push(key.clone());
        }
    }

    if let Some(ip) = ip_hint {
        if !ip.is_empty() && seen.insert((IdentityKind::Ip, ip.to_string())) {
            out.push(IdentityKey::new(IdentityKind::Ip, ip));
        }
    }

    out
}

// ── Canonical record ──────────────────────────────────────────────────────────

/// Denormalized attributes carried alongside a canonical resolution, so
/// callers can render a device without a second fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalAttrs {
    pub ip: Option<String>,
    pub partition: Option<String>,
    pub hostname: Option<String>,
    pub source: Option<String>,
}

/// The resolver's output: the surviving device after identity-based
/// deduplication, plus a cheap equality hash over its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub canonical_device_id: DeviceId,
    pub partition: String,
    pub metadata_hash: String,
    pub attributes: CanonicalAttrs,
    pub updated_at: DateTime<Utc>,
}

// ── Metadata hash ─────────────────────────────────────────────────────────────

/// Stable hash over a metadata map: SHA-256 hex of the canonical JSON
/// (keys sorted), so the hash is identical across map orderings and tiers.
pub fn metadata_hash(metadata: &HashMap<String, String>) -> String {
    let sorted: BTreeMap<&str, &str> = metadata
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let bytes = serde_json::to_vec(&sorted).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{:x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_empty_and_unspecified() {
        let keys = vec![
            IdentityKey::new(IdentityKind::DeviceId, "default:10.0.0.1"),
            IdentityKey::new(IdentityKind::Mac, ""),
            IdentityKey::new(IdentityKind::Unspecified, "x"),
        ];
        let out = normalize_identity_keys(&keys, None);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, IdentityKind::DeviceId);
    }

    #[test]
    fn normalize_collapses_duplicates_preserving_order() {
        let keys = vec![
            IdentityKey::new(IdentityKind::Ip, "10.0.0.1"),
            IdentityKey::new(IdentityKind::Mac, "aa:bb"),
            IdentityKey::new(IdentityKind::Ip, "10.0.0.1"),
        ];
        let out = normalize_identity_keys(&keys, None);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].kind, IdentityKind::Ip);
        assert_eq!(out[1].kind, IdentityKind::Mac);
    }

    #[test]
    fn normalize_appends_ip_hint_once() {
        let keys = vec![IdentityKey::new(IdentityKind::Ip, "10.0.0.1")];
        let out = normalize_identity_keys(&keys, Some("10.0.0.1"));
        assert_eq!(out.len(), 1);

        let out = normalize_identity_keys(&keys, Some("10.0.0.2"));
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].value, "10.0.0.2");
    }

    #[test]
    fn metadata_hash_is_order_independent() {
        let mut a = HashMap::new();
        a.insert("x".to_string(), "1".to_string());
        a.insert("y".to_string(), "2".to_string());

        let mut b = HashMap::new();
        b.insert("y".to_string(), "2".to_string());
        b.insert("x".to_string(), "1".to_string());

        assert_eq!(metadata_hash(&a), metadata_hash(&b));
    }

    #[test]
    fn metadata_hash_differs_on_value_change() {
        let mut a = HashMap::new();
        a.insert("x".to_string(), "1".to_string());
        let mut b = a.clone();
        b.insert("x".to_string(), "2".to_string());
        assert_ne!(metadata_hash(&a), metadata_hash(&b));
    }
}
