use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use radar_domain::{
    device_id_for, update, CanonicalDevice, ComponentType, DeviceId, DeviceUpdate,
    OnboardingEvent, OnboardingPackage, PackageStatus, PollerId, Sighting,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::device::DeviceStore;
use crate::error::{KvError, StoreError};
use crate::kv::{KvEntry, KvStore};
use crate::onboarding::{OnboardingStore, PackageFilter};
use crate::rows::{
    DiscoveredInterface, ServiceRecord, ServiceStatus, SightingEvent, SysmonRow,
    TimeseriesMetric, TopologyEvent,
};
use crate::telemetry::TelemetryStore;

#[derive(Debug, Default)]
struct Inner {
    devices: HashMap<DeviceId, CanonicalDevice>,
    sightings: Vec<Sighting>,
    sighting_events: Vec<SightingEvent>,

    timeseries: Vec<TimeseriesMetric>,
    statuses: Vec<ServiceStatus>,
    services: Vec<ServiceRecord>,
    sysmon: Vec<SysmonRow>,
    interfaces: Vec<DiscoveredInterface>,
    topology: Vec<TopologyEvent>,

    packages: HashMap<Uuid, OnboardingPackage>,
    package_events: Vec<OnboardingEvent>,
}

/// In-memory implementation of the store traits.
///
/// All data is lost on process exit. Suitable for tests and local serve;
/// production deployments point the same traits at the streaming engine.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
    sighting_ttl: chrono::Duration,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            inner: Arc::new(RwLock::new(Inner::default())),
            sighting_ttl: chrono::Duration::hours(24),
        }
    }

    pub fn with_sighting_ttl(ttl: chrono::Duration) -> Self {
        InMemoryStore { sighting_ttl: ttl, ..Self::new() }
    }

    /// Seed a sighting row (test/local harness only; production sightings
    /// are written by the sweep pipeline inside the storage engine).
    pub async fn add_sighting(&self, sighting: Sighting) {
        let mut guard = self.inner.write().await;
        guard.sightings.push(sighting);
    }

    pub async fn sighting_events(&self) -> Vec<SightingEvent> {
        self.inner.read().await.sighting_events.clone()
    }

    pub async fn telemetry_counts(&self) -> (usize, usize, usize, usize) {
        let guard = self.inner.read().await;
        (
            guard.timeseries.len(),
            guard.statuses.len(),
            guard.services.len(),
            guard.sysmon.len(),
        )
    }

    pub async fn sysmon_rows(&self) -> Vec<SysmonRow> {
        self.inner.read().await.sysmon.clone()
    }

    pub async fn interfaces(&self) -> Vec<DiscoveredInterface> {
        self.inner.read().await.interfaces.clone()
    }

    pub async fn topology_events(&self) -> Vec<TopologyEvent> {
        self.inner.read().await.topology.clone()
    }

    fn apply_update(inner: &mut Inner, u: &DeviceUpdate) {
        let id = match &u.device_id {
            Some(id) => id.clone(),
            None => DeviceId::new(device_id_for(&u.partition, &u.ip)),
        };
        let dev = inner.devices.entry(id.clone()).or_insert_with(|| CanonicalDevice {
            device_id: id,
            ip: u.ip.clone(),
            hostname: None,
            mac: None,
            metadata: HashMap::new(),
            discovery_sources: vec![],
            modified_time: u.timestamp,
        });
        if !u.ip.is_empty() {
            dev.ip = u.ip.clone();
        }
        if let Some(h) = &u.hostname {
            dev.hostname = Some(h.clone());
        }
        if let Some(m) = &u.mac {
            dev.mac = Some(m.clone());
            // The streaming engine also indexes mac as a metadata predicate;
            // mirror that here so resolver lookups behave the same.
            dev.metadata.insert("mac".to_string(), m.clone());
        }
        for (k, v) in &u.metadata {
            dev.metadata.insert(k.clone(), v.clone());
        }
        if !dev.discovery_sources.contains(&u.source) {
            dev.discovery_sources.push(u.source);
        }
        if u.timestamp > dev.modified_time {
            dev.modified_time = u.timestamp;
        }
    }
}

fn by_modified_desc(devices: &mut [CanonicalDevice]) {
    devices.sort_by(|a, b| b.modified_time.cmp(&a.modified_time));
}

#[async_trait]
impl DeviceStore for InMemoryStore {
    async fn get_device(&self, id: &DeviceId) -> Result<Option<CanonicalDevice>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.devices.get(id).cloned())
    }

    async fn get_devices_by_ip(&self, ip: &str) -> Result<Vec<CanonicalDevice>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<CanonicalDevice> = guard
            .devices
            .values()
            .filter(|d| d.ip == ip)
            .cloned()
            .collect();
        by_modified_desc(&mut out);
        Ok(out)
    }

    async fn find_latest_by_metadata(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<CanonicalDevice>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<CanonicalDevice> = guard
            .devices
            .values()
            .filter(|d| d.metadata.get(key).map(String::as_str) == Some(value))
            .cloned()
            .collect();
        by_modified_desc(&mut out);
        Ok(out.into_iter().next())
    }

    async fn list_devices_with_metadata_key(
        &self,
        key: &str,
    ) -> Result<Vec<CanonicalDevice>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<CanonicalDevice> = guard
            .devices
            .values()
            .filter(|d| d.metadata.contains_key(key))
            .cloned()
            .collect();
        by_modified_desc(&mut out);
        Ok(out)
    }

    async fn existing_unmerged_ids(
        &self,
        ids: &[DeviceId],
    ) -> Result<Vec<DeviceId>, StoreError> {
        let guard = self.inner.read().await;
        Ok(ids
            .iter()
            .filter(|id| {
                guard
                    .devices
                    .get(id)
                    .map_or(false, |d| !d.is_tombstoned())
            })
            .cloned()
            .collect())
    }

    async fn publish_device_updates(&self, updates: &[DeviceUpdate]) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        for u in updates {
            Self::apply_update(&mut guard, u);
        }
        Ok(())
    }

    async fn list_stale_ip_only_devices(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<CanonicalDevice>, StoreError> {
        let guard = self.inner.read().await;
        let strong = [
            update::ARMIS_DEVICE_ID,
            update::NETBOX_DEVICE_ID,
            update::INTEGRATION_ID,
        ];
        Ok(guard
            .devices
            .values()
            .filter(|d| {
                d.modified_time < cutoff
                    && !d.is_tombstoned()
                    && !d.is_soft_deleted()
                    && strong.iter().all(|k| !d.metadata.contains_key(*k))
            })
            .cloned()
            .collect())
    }

    async fn soft_delete_device(&self, id: &DeviceId) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let dev = guard
            .devices
            .get_mut(id)
            .ok_or_else(|| StoreError::DeviceNotFound(id.to_string()))?;
        dev.metadata
            .insert(update::DELETED.to_string(), "true".to_string());
        Ok(())
    }

    async fn expire_network_sightings(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Sighting>, StoreError> {
        let ttl = self.sighting_ttl;
        let mut guard = self.inner.write().await;
        let (expired, live): (Vec<Sighting>, Vec<Sighting>) = guard
            .sightings
            .drain(..)
            .partition(|s| s.is_expired(now, ttl));
        guard.sightings = live;
        Ok(expired)
    }

    async fn append_sighting_event(&self, event: &SightingEvent) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.sighting_events.push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl TelemetryStore for InMemoryStore {
    async fn write_timeseries_metrics(
        &self,
        _poller_id: &PollerId,
        rows: &[TimeseriesMetric],
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.timeseries.extend_from_slice(rows);
        Ok(())
    }

    async fn write_service_statuses(
        &self,
        _poller_id: &PollerId,
        rows: &[ServiceStatus],
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.statuses.extend_from_slice(rows);
        Ok(())
    }

    async fn write_services(
        &self,
        _poller_id: &PollerId,
        rows: &[ServiceRecord],
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.services.extend_from_slice(rows);
        Ok(())
    }

    async fn write_sysmon_metrics(
        &self,
        _poller_id: &PollerId,
        rows: &[SysmonRow],
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.sysmon.extend_from_slice(rows);
        Ok(())
    }

    async fn write_interfaces(&self, rows: &[DiscoveredInterface]) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.interfaces.extend_from_slice(rows);
        Ok(())
    }

    async fn write_topology_events(&self, rows: &[TopologyEvent]) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.topology.extend_from_slice(rows);
        Ok(())
    }
}

#[async_trait]
impl OnboardingStore for InMemoryStore {
    async fn get_package(&self, id: Uuid) -> Result<Option<OnboardingPackage>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.packages.get(&id).cloned())
    }

    async fn find_package(
        &self,
        component_type: ComponentType,
        component_id: &str,
    ) -> Result<Option<OnboardingPackage>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<OnboardingPackage> = guard
            .packages
            .values()
            .filter(|p| {
                p.component_type == component_type
                    && p.component_id == component_id
                    && p.status != PackageStatus::Deleted
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out.into_iter().next())
    }

    async fn list_packages(
        &self,
        filter: &PackageFilter,
    ) -> Result<Vec<OnboardingPackage>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<OnboardingPackage> = guard
            .packages
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn upsert_package(&self, pkg: &OnboardingPackage) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.packages.insert(pkg.package_id, pkg.clone());
        Ok(())
    }

    async fn delete_package(&self, id: Uuid) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.packages.remove(&id);
        Ok(())
    }

    async fn append_event(&self, event: &OnboardingEvent) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.package_events.push(event.clone());
        Ok(())
    }

    async fn list_events(
        &self,
        package_id: Uuid,
        limit: u32,
    ) -> Result<Vec<OnboardingEvent>, StoreError> {
        let guard = self.inner.read().await;
        let filtered: Vec<OnboardingEvent> = guard
            .package_events
            .iter()
            .filter(|e| e.package_id == package_id)
            .cloned()
            .collect();
        let start = filtered.len().saturating_sub(limit as usize);
        Ok(filtered[start..].to_vec())
    }

    async fn list_allowed_pollers(&self) -> Result<Vec<String>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<String> = guard
            .packages
            .values()
            .filter(|p| !p.status.is_terminal())
            .filter_map(|p| p.poller_id.clone())
            .collect();
        out.sort();
        out.dedup();
        Ok(out)
    }

    async fn component_id_in_use(
        &self,
        component_type: ComponentType,
        component_id: &str,
    ) -> Result<bool, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.packages.values().any(|p| {
            p.component_type == component_type
                && p.component_id == component_id
                && p.status != PackageStatus::Deleted
        }))
    }
}

// ── In-memory KV ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct InMemoryKv {
    inner: Arc<RwLock<HashMap<String, KvEntry>>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, KvError> {
        let guard = self.inner.read().await;
        Ok(guard.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<u64, KvError> {
        let mut guard = self.inner.write().await;
        let revision = guard.get(key).map_or(1, |e| e.revision + 1);
        guard.insert(key.to_string(), KvEntry { value: value.to_vec(), revision });
        Ok(revision)
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<u64, KvError> {
        let mut guard = self.inner.write().await;
        if guard.contains_key(key) {
            return Err(KvError::AlreadyExists(key.to_string()));
        }
        guard.insert(key.to_string(), KvEntry { value: value.to_vec(), revision: 1 });
        Ok(1)
    }

    async fn update(&self, key: &str, value: &[u8], revision: u64) -> Result<u64, KvError> {
        let mut guard = self.inner.write().await;
        let entry = guard
            .get_mut(key)
            .ok_or_else(|| KvError::NotFound(key.to_string()))?;
        if entry.revision != revision {
            return Err(KvError::Aborted(key.to_string()));
        }
        entry.value = value.to_vec();
        entry.revision += 1;
        Ok(entry.revision)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut guard = self.inner.write().await;
        guard.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let guard = self.inner.read().await;
        let mut out: Vec<String> = guard
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radar_domain::DeviceSource;

    fn sweep_update(id: &str, ip: &str, ts: DateTime<Utc>) -> DeviceUpdate {
        DeviceUpdate {
            device_id: Some(DeviceId::new(id)),
            partition: radar_domain::partition_of(id).to_string(),
            ip: ip.to_string(),
            source: DeviceSource::Sweep,
            timestamp: ts,
            is_available: true,
            metadata: HashMap::new(),
            hostname: None,
            mac: None,
        }
    }

    #[tokio::test]
    async fn updates_apply_and_fetch_by_ip_orders_recent_first() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let mut old = sweep_update("default:10.0.0.1", "10.0.0.1", now - chrono::Duration::hours(1));
        old.metadata.insert("k".into(), "v".into());
        let new = sweep_update("edge:10.0.0.1", "10.0.0.1", now);
        store.publish_device_updates(&[old, new]).await.unwrap();

        let by_ip = store.get_devices_by_ip("10.0.0.1").await.unwrap();
        assert_eq!(by_ip.len(), 2);
        assert_eq!(by_ip[0].device_id.as_str(), "edge:10.0.0.1");
    }

    #[tokio::test]
    async fn existing_unmerged_ids_skips_tombstones() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .publish_device_updates(&[
                sweep_update("default:10.0.0.1", "10.0.0.1", now),
                sweep_update("default:10.0.0.2", "10.0.0.2", now),
            ])
            .await
            .unwrap();
        store
            .publish_device_updates(&[DeviceUpdate::tombstone(
                DeviceId::new("default:10.0.0.2"),
                &DeviceId::new("default:10.0.0.1"),
            )])
            .await
            .unwrap();

        let survivors = store
            .existing_unmerged_ids(&[
                DeviceId::new("default:10.0.0.1"),
                DeviceId::new("default:10.0.0.2"),
                DeviceId::new("default:10.0.0.3"),
            ])
            .await
            .unwrap();
        assert_eq!(survivors, vec![DeviceId::new("default:10.0.0.1")]);
    }

    #[tokio::test]
    async fn expire_sightings_partitions_by_ttl() {
        let store = InMemoryStore::with_sighting_ttl(chrono::Duration::hours(1));
        let now = Utc::now();
        store
            .add_sighting(Sighting {
                sighting_id: Uuid::new_v4(),
                ip: "10.0.0.1".into(),
                partition: "default".into(),
                first_seen: now - chrono::Duration::hours(5),
                last_seen: now - chrono::Duration::hours(2),
                metadata: HashMap::new(),
            })
            .await;
        store
            .add_sighting(Sighting {
                sighting_id: Uuid::new_v4(),
                ip: "10.0.0.2".into(),
                partition: "default".into(),
                first_seen: now,
                last_seen: now,
                metadata: HashMap::new(),
            })
            .await;

        let expired = store.expire_network_sightings(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].ip, "10.0.0.1");

        // Second call finds nothing; expiry is a drain.
        assert!(store.expire_network_sightings(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn kv_put_if_absent_then_update_at_revision() {
        let kv = InMemoryKv::new();
        let rev = kv.put_if_absent("identity/default/ip/10.0.0.1", b"a").await.unwrap();
        assert_eq!(rev, 1);
        assert!(matches!(
            kv.put_if_absent("identity/default/ip/10.0.0.1", b"b").await,
            Err(KvError::AlreadyExists(_))
        ));

        let rev2 = kv.update("identity/default/ip/10.0.0.1", b"b", rev).await.unwrap();
        assert_eq!(rev2, 2);
        assert!(matches!(
            kv.update("identity/default/ip/10.0.0.1", b"c", rev).await,
            Err(KvError::Aborted(_))
        ));
    }

    #[tokio::test]
    async fn allowed_pollers_excludes_terminal_packages() {
        use radar_domain::{OnboardingPackage, SecurityMode};

        let store = InMemoryStore::new();
        let now = Utc::now();
        let mut pkg = OnboardingPackage {
            package_id: Uuid::new_v4(),
            label: "p".into(),
            component_id: "edge-1".into(),
            component_type: ComponentType::Poller,
            parent_type: None,
            parent_id: None,
            poller_id: Some("edge-1".into()),
            site: None,
            security_mode: SecurityMode::Spire,
            status: PackageStatus::Issued,
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
        };
        store.upsert_package(&pkg).await.unwrap();
        assert_eq!(store.list_allowed_pollers().await.unwrap(), vec!["edge-1"]);

        pkg.status = PackageStatus::Revoked;
        store.upsert_package(&pkg).await.unwrap();
        assert!(store.list_allowed_pollers().await.unwrap().is_empty());
    }
}
