use std::collections::HashMap;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::onboarding::*;
use crate::types::*;
use crate::update::{self, DeviceUpdate};

fn package(status: PackageStatus) -> OnboardingPackage {
    let now = Utc::now();
    OnboardingPackage {
        package_id: Uuid::new_v4(),
        label: "Edge Poller".into(),
        component_id: "edge-poller".into(),
        component_type: ComponentType::Poller,
        parent_type: None,
        parent_id: None,
        poller_id: Some("edge-poller".into()),
        site: None,
        security_mode: SecurityMode::Spire,
        status,
        downstream_entry_id: None,
        downstream_spiffe_id: None,
        selectors: vec![],
        join_token_ciphertext: None,
        join_token_expires_at: None,
        bundle_ciphertext: None,
        download_token_hash: None,
        download_token_expires_at: None,
        created_by: "tests".into(),
        created_at: now,
        updated_at: now,
        delivered_at: None,
        activated_at: None,
        activated_from_ip: None,
        last_seen_spiffe_id: None,
        revoked_at: None,
        deleted_at: None,
        deleted_by: None,
        metadata: HashMap::new(),
        checker_kind: None,
        checker_config_json: None,
        notes: None,
        kv_revision: None,
    }
}

#[test]
fn tombstone_carries_merge_pointer_and_unavailability() {
    let t = DeviceUpdate::tombstone(
        DeviceId::new("default:10.0.0.2"),
        &DeviceId::new("default:10.0.0.1"),
    );
    assert!(t.is_tombstone());
    assert!(!t.is_available);
    assert_eq!(
        t.metadata.get(update::MERGED_INTO).map(String::as_str),
        Some("default:10.0.0.1")
    );
    assert_eq!(t.partition, "default");
}

#[test]
fn canonical_device_tombstone_detection() {
    let mut metadata = HashMap::new();
    let mut dev = CanonicalDevice {
        device_id: DeviceId::new("default:10.0.0.2"),
        ip: "10.0.0.2".into(),
        hostname: None,
        mac: None,
        metadata: metadata.clone(),
        discovery_sources: vec![DeviceSource::Sweep],
        modified_time: Utc::now(),
    };
    assert!(!dev.is_tombstoned());
    assert!(!dev.is_soft_deleted());

    metadata.insert(update::MERGED_INTO.to_string(), "default:10.0.0.1".into());
    dev.metadata = metadata.clone();
    assert!(dev.is_tombstoned());
    assert_eq!(dev.merged_into(), Some("default:10.0.0.1"));

    metadata.insert(update::DELETED.to_string(), "true".into());
    dev.metadata = metadata;
    assert!(dev.is_soft_deleted());
}

#[test]
fn updated_at_is_strictly_monotone() {
    let mut pkg = package(PackageStatus::Issued);
    let before = pkg.updated_at;

    // A clock that has not advanced past the previous write still moves
    // updated_at forward by 1ms.
    pkg.touch(before);
    assert!(pkg.updated_at > before);

    let later = pkg.updated_at + Duration::seconds(5);
    pkg.touch(later);
    assert_eq!(pkg.updated_at, later);
}

#[test]
fn deletable_only_after_revoke_or_expiry() {
    assert!(!package(PackageStatus::Issued).is_deletable());
    assert!(!package(PackageStatus::Activated).is_deletable());
    assert!(package(PackageStatus::Revoked).is_deletable());
    assert!(package(PackageStatus::Expired).is_deletable());

    // A package re-activated by a racing poller but carrying revoked_at
    // remains deletable.
    let mut pkg = package(PackageStatus::Activated);
    pkg.revoked_at = Some(Utc::now());
    assert!(pkg.is_deletable());
}

#[test]
fn component_type_round_trips() {
    for (s, t) in [
        ("poller", ComponentType::Poller),
        ("agent", ComponentType::Agent),
        ("checker", ComponentType::Checker),
    ] {
        assert_eq!(s.parse::<ComponentType>().unwrap(), t);
        assert_eq!(t.to_string(), s);
    }
    assert!("gateway".parse::<ComponentType>().is_err());
}

#[test]
fn statuses_serialize_lowercase() {
    assert_eq!(
        serde_json::to_string(&PackageStatus::Delivered).unwrap(),
        "\"delivered\""
    );
    assert_eq!(
        serde_json::to_string(&SecurityMode::Mtls).unwrap(),
        "\"mtls\""
    );
    assert_eq!(
        serde_json::to_string(&DeviceSource::SelfReported).unwrap(),
        "\"self_reported\""
    );
}
