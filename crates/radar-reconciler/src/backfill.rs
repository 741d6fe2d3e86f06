use std::collections::HashMap;
use std::sync::Arc;

use radar_domain::{
    device_id_for, partition_of, update, CanonicalDevice, DeviceId, DeviceUpdate, IdentityKind,
};
use radar_identity::{record_from, IdentityKvMirror};
use radar_store::DeviceStore;
use tracing::{debug, info, warn};

use crate::error::BackfillError;
use crate::report::{BackfillReport, BackfillRequest};

/// One-shot identity backfill over the device inventory.
///
/// Pass A groups live devices by strong identity (armis, then netbox) and
/// merges every group into its most-recently-modified member. Pass B takes
/// each strong-identity canonical and merges devices that exist under one
/// of its alias IPs. Both passes are idempotent: tombstoned members drop
/// out of the scans, so a second run over the same snapshot emits nothing.
pub async fn backfill(
    req: BackfillRequest,
    store: Arc<dyn DeviceStore>,
    mirror: Option<&IdentityKvMirror>,
) -> Result<BackfillReport, BackfillError> {
    let mut report = BackfillReport {
        dry_run: req.dry_run,
        seed_kv_only: req.seed_kv_only,
        ..Default::default()
    };

    // Pass A — strong-identity dedup.
    let groups = collect_strong_identity_groups(store.as_ref(), &mut report).await?;
    let mut tombstones: Vec<DeviceUpdate> = Vec::new();
    let mut canonicals: Vec<(String, CanonicalDevice)> = Vec::new();

    for (group_key, members) in groups {
        let Some(canonical) = members
            .iter()
            .max_by_key(|d| d.modified_time)
            .cloned()
        else {
            continue;
        };

        if members.len() > 1 {
            report.duplicate_groups += 1;
            for member in &members {
                if member.device_id == canonical.device_id {
                    continue;
                }
                debug!(
                    duplicate = %member.device_id,
                    canonical = %canonical.device_id,
                    group = %group_key,
                    "merging strong-identity duplicate"
                );
                tombstones.push(DeviceUpdate::tombstone(
                    member.device_id.clone(),
                    &canonical.device_id,
                ));
            }
        }
        canonicals.push((group_key, canonical));
    }

    // Pass B — IP-alias dedup against each canonical.
    for (_, canonical) in &canonicals {
        let candidate_ids = alias_candidate_ids(canonical);
        if candidate_ids.is_empty() {
            continue;
        }
        for chunk in candidate_ids.chunks(req.lookup_chunk()) {
            let survivors = match store.existing_unmerged_ids(chunk).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(canonical = %canonical.device_id, error = %e, "alias existence check failed");
                    report.errors.push(format!("alias check {}: {}", canonical.device_id, e));
                    continue;
                }
            };
            for id in survivors {
                report.ip_alias_tombstones += 1;
                tombstones.push(DeviceUpdate::tombstone(id, &canonical.device_id));
            }
        }
    }

    report.tombstones_would_emit = tombstones.len();

    if req.dry_run {
        info!(
            groups = report.duplicate_groups,
            would_emit = report.tombstones_would_emit,
            "backfill dry run complete"
        );
        return Ok(report);
    }

    if req.seed_kv_only {
        if let Some(mirror) = mirror {
            for (group_key, canonical) in &canonicals {
                let (kind, value) = match group_key.split_once(':') {
                    Some(("armis", v)) => (IdentityKind::ArmisId, v),
                    Some(("netbox", v)) => (IdentityKind::NetboxId, v),
                    _ => continue,
                };
                match mirror.seed(kind, value, &record_from(canonical)).await {
                    Ok(true) => report.kv_seeded += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(kind = %kind, value, error = %e, "identity mirror seed failed");
                        report.errors.push(format!("kv seed {}/{}: {}", kind, value, e));
                    }
                }
            }
        }
        info!(seeded = report.kv_seeded, "backfill kv seeding complete");
        return Ok(report);
    }

    // Live run: publish in bounded batches, cancellable between chunks.
    for chunk in tombstones.chunks(req.chunk_size()) {
        if is_shutdown(&req) {
            report.cancelled = true;
            warn!(
                emitted = report.tombstones_emitted,
                pending = report.tombstones_would_emit - report.tombstones_emitted,
                "backfill cancelled between chunks"
            );
            break;
        }
        store.publish_device_updates(chunk).await?;
        report.tombstones_emitted += chunk.len();
    }

    info!(
        groups = report.duplicate_groups,
        emitted = report.tombstones_emitted,
        "backfill complete"
    );
    Ok(report)
}

fn is_shutdown(req: &BackfillRequest) -> bool {
    req.shutdown.as_ref().map_or(false, |rx| *rx.borrow())
}

async fn collect_strong_identity_groups(
    store: &dyn DeviceStore,
    report: &mut BackfillReport,
) -> Result<HashMap<String, Vec<CanonicalDevice>>, BackfillError> {
    let mut groups: HashMap<String, Vec<CanonicalDevice>> = HashMap::new();

    for device in store
        .list_devices_with_metadata_key(update::ARMIS_DEVICE_ID)
        .await?
    {
        report.scanned += 1;
        if device.is_tombstoned() {
            continue;
        }
        let Some(id) = device
            .metadata
            .get(update::ARMIS_DEVICE_ID)
            .filter(|v| !v.is_empty())
        else {
            continue;
        };
        groups.entry(format!("armis:{}", id)).or_default().push(device);
    }

    for device in store
        .list_devices_with_metadata_key(update::INTEGRATION_TYPE)
        .await?
    {
        report.scanned += 1;
        if device.is_tombstoned() {
            continue;
        }
        if device.metadata.get(update::INTEGRATION_TYPE).map(String::as_str) != Some("netbox") {
            continue;
        }
        let Some(id) = device
            .metadata
            .get(update::INTEGRATION_ID)
            .or_else(|| device.metadata.get(update::NETBOX_DEVICE_ID))
            .filter(|v| !v.is_empty())
        else {
            continue;
        };
        groups.entry(format!("netbox:{}", id)).or_default().push(device);
    }

    Ok(groups)
}

/// Candidate `partition:ip` ids for every alias IP of a canonical: the
/// union of its primary IP, comma-split `all_ips`, and `alt_ip:<ip>` keys,
/// minus the canonical's own id.
fn alias_candidate_ids(canonical: &CanonicalDevice) -> Vec<DeviceId> {
    let partition = partition_of(canonical.device_id.as_str());
    let mut ips: Vec<String> = Vec::new();

    if !canonical.ip.is_empty() {
        ips.push(canonical.ip.clone());
    }
    if let Some(all) = canonical.metadata.get(update::ALL_IPS) {
        for ip in all.split(',') {
            let ip = ip.trim();
            if !ip.is_empty() {
                ips.push(ip.to_string());
            }
        }
    }
    for key in canonical.metadata.keys() {
        if let Some(ip) = key.strip_prefix(update::ALT_IP_PREFIX) {
            if !ip.is_empty() {
                ips.push(ip.to_string());
            }
        }
    }

    ips.sort();
    ips.dedup();

    ips.into_iter()
        .map(|ip| DeviceId::new(device_id_for(partition, &ip)))
        .filter(|id| *id != canonical.device_id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use radar_store::{InMemoryKv, InMemoryStore, KvStore};
    use std::collections::HashMap as Map;

    fn device(id: &str, ip: &str, age_mins: i64, metadata: &[(&str, &str)]) -> DeviceUpdate {
        DeviceUpdate {
            device_id: Some(DeviceId::new(id)),
            partition: partition_of(id).to_string(),
            ip: ip.to_string(),
            source: radar_domain::DeviceSource::Integration,
            timestamp: Utc::now() - Duration::minutes(age_mins),
            is_available: true,
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            hostname: None,
            mac: None,
        }
    }

    async fn seeded(updates: Vec<DeviceUpdate>) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store.publish_device_updates(&updates).await.unwrap();
        store
    }

    #[tokio::test]
    async fn dry_run_counts_without_publishing() {
        let store = seeded(vec![
            device("default:canonical", "10.0.0.1", 0, &[(update::ARMIS_DEVICE_ID, "ARM-1")]),
            device("default:duplicate", "10.0.0.5", 60, &[(update::ARMIS_DEVICE_ID, "ARM-1")]),
        ])
        .await;

        let req = BackfillRequest { dry_run: true, ..Default::default() };
        let report = backfill(req, store.clone(), None).await.unwrap();

        assert_eq!(report.duplicate_groups, 1);
        assert_eq!(report.tombstones_would_emit, 1);
        assert_eq!(report.tombstones_emitted, 0);

        let dup = store
            .get_device(&DeviceId::new("default:duplicate"))
            .await
            .unwrap()
            .unwrap();
        assert!(!dup.is_tombstoned(), "dry run must not publish");
    }

    #[tokio::test]
    async fn live_run_tombstones_duplicate_into_latest() {
        let store = seeded(vec![
            device("default:canonical", "10.0.0.1", 0, &[(update::ARMIS_DEVICE_ID, "ARM-1")]),
            device("default:duplicate", "10.0.0.5", 60, &[(update::ARMIS_DEVICE_ID, "ARM-1")]),
        ])
        .await;

        let report = backfill(BackfillRequest::default(), store.clone(), None)
            .await
            .unwrap();
        assert_eq!(report.tombstones_emitted, 1);

        let dup = store
            .get_device(&DeviceId::new("default:duplicate"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dup.merged_into(), Some("default:canonical"));
    }

    #[tokio::test]
    async fn ip_alias_pass_merges_existing_alias_device() {
        let store = seeded(vec![
            device(
                "default:canonical",
                "10.0.0.1",
                0,
                &[(update::ARMIS_DEVICE_ID, "ARM-1"), (update::ALL_IPS, "10.0.0.2")],
            ),
            device("default:10.0.0.2", "10.0.0.2", 30, &[]),
        ])
        .await;

        let report = backfill(BackfillRequest::default(), store.clone(), None)
            .await
            .unwrap();
        assert_eq!(report.ip_alias_tombstones, 1);

        let alias = store
            .get_device(&DeviceId::new("default:10.0.0.2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alias.merged_into(), Some("default:canonical"));
    }

    #[tokio::test]
    async fn second_run_emits_nothing() {
        let store = seeded(vec![
            device("default:canonical", "10.0.0.1", 0, &[(update::ARMIS_DEVICE_ID, "ARM-1")]),
            device("default:duplicate", "10.0.0.5", 60, &[(update::ARMIS_DEVICE_ID, "ARM-1")]),
        ])
        .await;

        let first = backfill(BackfillRequest::default(), store.clone(), None)
            .await
            .unwrap();
        assert_eq!(first.tombstones_emitted, 1);

        let second = backfill(BackfillRequest::default(), store.clone(), None)
            .await
            .unwrap();
        assert_eq!(second.tombstones_emitted, 0);
        assert_eq!(second.duplicate_groups, 0);
    }

    #[tokio::test]
    async fn netbox_groups_use_integration_id() {
        let store = seeded(vec![
            device(
                "default:nb-new",
                "10.1.0.1",
                0,
                &[(update::INTEGRATION_TYPE, "netbox"), (update::INTEGRATION_ID, "77")],
            ),
            device(
                "default:nb-old",
                "10.1.0.2",
                90,
                &[(update::INTEGRATION_TYPE, "netbox"), (update::NETBOX_DEVICE_ID, "77")],
            ),
        ])
        .await;

        let report = backfill(BackfillRequest::default(), store.clone(), None)
            .await
            .unwrap();
        assert_eq!(report.duplicate_groups, 1);

        let old = store
            .get_device(&DeviceId::new("default:nb-old"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(old.merged_into(), Some("default:nb-new"));
    }

    #[tokio::test]
    async fn seed_kv_only_primes_mirror_and_skips_tombstones() {
        let store = seeded(vec![
            device("default:canonical", "10.0.0.1", 0, &[(update::ARMIS_DEVICE_ID, "ARM-1")]),
            device("default:duplicate", "10.0.0.5", 60, &[(update::ARMIS_DEVICE_ID, "ARM-1")]),
        ])
        .await;
        let kv = Arc::new(InMemoryKv::new());
        let mirror = IdentityKvMirror::new(kv.clone(), "default");

        let req = BackfillRequest { seed_kv_only: true, ..Default::default() };
        let report = backfill(req, store.clone(), Some(&mirror)).await.unwrap();

        assert_eq!(report.kv_seeded, 1);
        assert_eq!(report.tombstones_emitted, 0);
        assert!(kv
            .get("identity/default/armis_id/ARM-1")
            .await
            .unwrap()
            .is_some());

        let dup = store
            .get_device(&DeviceId::new("default:duplicate"))
            .await
            .unwrap()
            .unwrap();
        assert!(!dup.is_tombstoned());
    }

    #[tokio::test]
    async fn shutdown_cancels_between_chunks() {
        // 3 duplicates, chunk size 1, shutdown pre-flagged: nothing publishes.
        let store = seeded(vec![
            device("default:canonical", "10.0.0.1", 0, &[(update::ARMIS_DEVICE_ID, "ARM-1")]),
            device("default:d1", "10.0.0.2", 10, &[(update::ARMIS_DEVICE_ID, "ARM-1")]),
            device("default:d2", "10.0.0.3", 20, &[(update::ARMIS_DEVICE_ID, "ARM-1")]),
            device("default:d3", "10.0.0.4", 30, &[(update::ARMIS_DEVICE_ID, "ARM-1")]),
        ])
        .await;

        let (tx, rx) = tokio::sync::watch::channel(true);
        let req = BackfillRequest {
            chunk_size: Some(1),
            shutdown: Some(rx),
            ..Default::default()
        };
        let report = backfill(req, store, None).await.unwrap();
        drop(tx);

        assert!(report.cancelled);
        assert_eq!(report.tombstones_emitted, 0);
        assert_eq!(report.tombstones_would_emit, 3);
    }

    #[test]
    fn alias_candidates_union_and_exclude_self() {
        let mut metadata = Map::new();
        metadata.insert(update::ALL_IPS.to_string(), "10.0.0.1, 10.0.0.2".to_string());
        metadata.insert(format!("{}10.0.0.3", update::ALT_IP_PREFIX), "1".to_string());
        let canonical = CanonicalDevice {
            device_id: DeviceId::new("default:10.0.0.1"),
            ip: "10.0.0.1".into(),
            hostname: None,
            mac: None,
            metadata,
            discovery_sources: vec![],
            modified_time: Utc::now(),
        };

        let ids = alias_candidate_ids(&canonical);
        // 10.0.0.1 is the canonical's own id and drops out.
        assert_eq!(
            ids,
            vec![DeviceId::new("default:10.0.0.2"), DeviceId::new("default:10.0.0.3")]
        );
    }
}
