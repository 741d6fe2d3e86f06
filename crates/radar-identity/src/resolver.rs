use std::sync::Arc;

use radar_domain::{
    metadata_hash, normalize_identity_keys, partition_of, update, CanonicalAttrs,
    CanonicalDevice, CanonicalRecord, DeviceId, IdentityKey, IdentityKind,
};
use radar_store::DeviceStore;
use tracing::{debug, warn};

use crate::error::ResolveError;

/// Bound on `_merged_into` chain walks. Anything deeper is a data defect.
const MAX_MERGE_HOPS: usize = 8;

/// Multi-key canonical device lookup with tombstone/merge awareness.
pub struct CanonicalResolver {
    store: Option<Arc<dyn DeviceStore>>,
}

impl CanonicalResolver {
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        CanonicalResolver { store: Some(store) }
    }

    /// A resolver with no storage handle. Every resolve fails with
    /// `StorageUnavailable`; exists so the API can come up degraded.
    pub fn detached() -> Self {
        CanonicalResolver { store: None }
    }

    /// Resolve the first key (in caller order) that lands on a canonical
    /// device. Returns the record and the key that matched.
    pub async fn resolve(
        &self,
        keys: &[IdentityKey],
        ip_hint: Option<&str>,
    ) -> Result<Option<(CanonicalRecord, IdentityKey)>, ResolveError> {
        let keys = normalize_identity_keys(keys, ip_hint);
        if keys.is_empty() {
            return Err(ResolveError::InvalidRequest);
        }
        let store = self.store.as_ref().ok_or(ResolveError::StorageUnavailable)?;

        for key in keys {
            let found = match key.kind {
                IdentityKind::DeviceId => {
                    self.lookup_device_id(store.as_ref(), &DeviceId::new(&key.value)).await?
                }
                IdentityKind::PartitionIp => {
                    self.lookup_partition_ip(store.as_ref(), &key.value).await?
                }
                IdentityKind::Ip => {
                    let candidates = store.get_devices_by_ip(&key.value).await?;
                    select_canonical(&candidates).cloned()
                }
                IdentityKind::Mac => {
                    self.lookup_metadata(store.as_ref(), "mac", &key.value).await?
                }
                IdentityKind::ArmisId => {
                    self.lookup_metadata(store.as_ref(), update::ARMIS_DEVICE_ID, &key.value)
                        .await?
                }
                IdentityKind::NetboxId => {
                    self.lookup_metadata(store.as_ref(), update::NETBOX_DEVICE_ID, &key.value)
                        .await?
                }
                IdentityKind::Unspecified => {
                    // Normalization drops these; tolerate callers that don't.
                    warn!(kind = %key.kind, "skipping unsupported identity kind");
                    None
                }
            };

            if let Some(device) = found {
                debug!(
                    device_id = %device.device_id,
                    matched = %key.kind,
                    "canonical resolution hit"
                );
                return Ok(Some((record_from(&device), key)));
            }
        }

        Ok(None)
    }

    /// Direct fetch; a tombstoned hit follows its merge chain to the
    /// surviving canonical.
    async fn lookup_device_id(
        &self,
        store: &dyn DeviceStore,
        id: &DeviceId,
    ) -> Result<Option<CanonicalDevice>, ResolveError> {
        let mut current = match store.get_device(id).await? {
            Some(d) => d,
            None => return Ok(None),
        };

        for _ in 0..MAX_MERGE_HOPS {
            if current.is_soft_deleted() {
                return Ok(None);
            }
            let Some(target) = current.merged_into().map(DeviceId::new) else {
                return Ok(Some(current));
            };
            match store.get_device(&target).await? {
                Some(next) => current = next,
                // Dangling pointer: surface the tombstone itself so the
                // caller can see the merge target.
                None => return Ok(Some(current)),
            }
        }
        warn!(device_id = %id, "merge chain exceeded {} hops", MAX_MERGE_HOPS);
        Ok(Some(current))
    }

    /// Candidates by IP, preferring the one in the requested partition.
    async fn lookup_partition_ip(
        &self,
        store: &dyn DeviceStore,
        value: &str,
    ) -> Result<Option<CanonicalDevice>, ResolveError> {
        let (partition, ip) = match value.split_once(':') {
            Some((p, ip)) if !ip.is_empty() => (p, ip),
            _ => return Ok(None),
        };
        let candidates = store.get_devices_by_ip(ip).await?;
        let in_partition = candidates
            .iter()
            .filter(|d| partition_of(d.device_id.as_str()) == partition)
            .cloned()
            .collect::<Vec<_>>();

        if let Some(hit) = select_canonical(&in_partition) {
            return Ok(Some(hit.clone()));
        }
        Ok(select_canonical(&candidates).cloned())
    }

    async fn lookup_metadata(
        &self,
        store: &dyn DeviceStore,
        key: &str,
        value: &str,
    ) -> Result<Option<CanonicalDevice>, ResolveError> {
        let Some(hit) = store.find_latest_by_metadata(key, value).await? else {
            return Ok(None);
        };
        // Re-fetch by device_id so a stale index row can't hand back a
        // tombstone without its merge target.
        self.lookup_device_id(store, &hit.device_id).await
    }
}

/// Canonical selection policy: first candidate that is neither tombstoned
/// nor soft-deleted; when every candidate is tombstoned, the first raw
/// candidate, so callers can follow the merge chain. Candidates arrive
/// most-recently-modified first from storage.
pub fn select_canonical(candidates: &[CanonicalDevice]) -> Option<&CanonicalDevice> {
    candidates
        .iter()
        .find(|d| !d.is_tombstoned() && !d.is_soft_deleted())
        .or_else(|| candidates.first())
}

/// Project a storage row into the resolver's output record.
pub fn record_from(device: &CanonicalDevice) -> CanonicalRecord {
    CanonicalRecord {
        canonical_device_id: device.device_id.clone(),
        partition: partition_of(device.device_id.as_str()).to_string(),
        metadata_hash: metadata_hash(&device.metadata),
        attributes: CanonicalAttrs {
            ip: Some(device.ip.clone()).filter(|s| !s.is_empty()),
            partition: Some(partition_of(device.device_id.as_str()).to_string()),
            hostname: device.hostname.clone(),
            source: device.discovery_sources.last().map(|s| s.to_string()),
        },
        updated_at: device.modified_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use radar_domain::{DeviceSource, DeviceUpdate};
    use radar_store::InMemoryStore;
    use std::collections::HashMap;

    fn update_for(id: &str, ip: &str) -> DeviceUpdate {
        DeviceUpdate {
            device_id: Some(DeviceId::new(id)),
            partition: partition_of(id).to_string(),
            ip: ip.to_string(),
            source: DeviceSource::Sweep,
            timestamp: Utc::now(),
            is_available: true,
            metadata: HashMap::new(),
            hostname: None,
            mac: None,
        }
    }

    async fn seeded_resolver(updates: Vec<DeviceUpdate>) -> (CanonicalResolver, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        store.publish_device_updates(&updates).await.unwrap();
        (CanonicalResolver::new(store.clone()), store)
    }

    #[tokio::test]
    async fn empty_keys_and_hint_is_invalid() {
        let (resolver, _) = seeded_resolver(vec![]).await;
        assert!(matches!(
            resolver.resolve(&[], None).await,
            Err(ResolveError::InvalidRequest)
        ));
    }

    #[tokio::test]
    async fn detached_resolver_reports_storage_unavailable() {
        let resolver = CanonicalResolver::detached();
        let keys = [IdentityKey::new(IdentityKind::Ip, "10.0.0.1")];
        assert!(matches!(
            resolver.resolve(&keys, None).await,
            Err(ResolveError::StorageUnavailable)
        ));
    }

    #[tokio::test]
    async fn ip_lookup_skips_tombstoned_candidate() {
        // Two candidates for the same IP; one is merged away.
        let (resolver, store) = seeded_resolver(vec![
            update_for("default:192.168.1.100", "192.168.1.100"),
            update_for("edge:192.168.1.100", "192.168.1.100"),
        ])
        .await;
        store
            .publish_device_updates(&[DeviceUpdate::tombstone(
                DeviceId::new("edge:192.168.1.100"),
                &DeviceId::new("default:192.168.1.100"),
            )])
            .await
            .unwrap();

        let keys = [IdentityKey::new(IdentityKind::Ip, "192.168.1.100")];
        let (record, matched) = resolver.resolve(&keys, None).await.unwrap().unwrap();
        assert_eq!(record.canonical_device_id.as_str(), "default:192.168.1.100");
        assert_eq!(matched.kind, IdentityKind::Ip);
    }

    #[tokio::test]
    async fn device_id_lookup_follows_merge_chain() {
        let (resolver, store) = seeded_resolver(vec![
            update_for("default:10.0.0.1", "10.0.0.1"),
            update_for("default:10.0.0.2", "10.0.0.2"),
        ])
        .await;
        store
            .publish_device_updates(&[DeviceUpdate::tombstone(
                DeviceId::new("default:10.0.0.2"),
                &DeviceId::new("default:10.0.0.1"),
            )])
            .await
            .unwrap();

        let keys = [IdentityKey::new(IdentityKind::DeviceId, "default:10.0.0.2")];
        let (record, _) = resolver.resolve(&keys, None).await.unwrap().unwrap();
        assert_eq!(record.canonical_device_id.as_str(), "default:10.0.0.1");
    }

    #[tokio::test]
    async fn partition_ip_prefers_matching_partition() {
        let (resolver, _) = seeded_resolver(vec![
            update_for("default:10.1.1.1", "10.1.1.1"),
            update_for("edge:10.1.1.1", "10.1.1.1"),
        ])
        .await;

        let keys = [IdentityKey::new(IdentityKind::PartitionIp, "edge:10.1.1.1")];
        let (record, _) = resolver.resolve(&keys, None).await.unwrap().unwrap();
        assert_eq!(record.canonical_device_id.as_str(), "edge:10.1.1.1");
    }

    #[tokio::test]
    async fn armis_id_lookup_fetches_latest_row() {
        let mut a = update_for("default:10.2.0.1", "10.2.0.1");
        a.metadata.insert(update::ARMIS_DEVICE_ID.into(), "ARM-1".into());
        let (resolver, _) = seeded_resolver(vec![a]).await;

        let keys = [IdentityKey::new(IdentityKind::ArmisId, "ARM-1")];
        let (record, matched) = resolver.resolve(&keys, None).await.unwrap().unwrap();
        assert_eq!(record.canonical_device_id.as_str(), "default:10.2.0.1");
        assert_eq!(matched.kind, IdentityKind::ArmisId);
    }

    #[tokio::test]
    async fn ip_hint_alone_resolves() {
        let (resolver, _) = seeded_resolver(vec![update_for("default:10.3.0.1", "10.3.0.1")]).await;
        let (record, matched) = resolver
            .resolve(&[], Some("10.3.0.1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.canonical_device_id.as_str(), "default:10.3.0.1");
        assert_eq!(matched.kind, IdentityKind::Ip);
    }

    #[tokio::test]
    async fn all_tombstoned_returns_first_raw_candidate() {
        let (resolver, store) = seeded_resolver(vec![update_for("default:10.4.0.1", "10.4.0.1")]).await;
        store
            .publish_device_updates(&[DeviceUpdate::tombstone(
                DeviceId::new("default:10.4.0.1"),
                &DeviceId::new("default:10.9.9.9"),
            )])
            .await
            .unwrap();

        // The merge target doesn't exist, so the raw tombstone surfaces
        // with its pointer intact for the caller to follow.
        let keys = [IdentityKey::new(IdentityKind::Ip, "10.4.0.1")];
        let (record, _) = resolver.resolve(&keys, None).await.unwrap().unwrap();
        assert_eq!(record.canonical_device_id.as_str(), "default:10.4.0.1");
    }
}
