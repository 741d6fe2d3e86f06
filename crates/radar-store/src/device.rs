use async_trait::async_trait;
use chrono::{DateTime, Utc};
use radar_domain::{CanonicalDevice, DeviceId, DeviceUpdate, Sighting};

use crate::error::StoreError;
use crate::rows::SightingEvent;

/// Interface to the device/sighting tables of the streaming storage engine.
///
/// Ordering contracts: every method returning multiple candidates yields
/// them most-recently-modified first; the core's canonical-selection policy
/// relies on that and never re-sorts.
#[async_trait]
pub trait DeviceStore: Send + Sync + 'static {
    async fn get_device(&self, id: &DeviceId) -> Result<Option<CanonicalDevice>, StoreError>;

    /// All devices whose primary IP matches, most recent first.
    async fn get_devices_by_ip(&self, ip: &str) -> Result<Vec<CanonicalDevice>, StoreError>;

    /// The single most-recently-modified device whose metadata carries
    /// `key == value`.
    async fn find_latest_by_metadata(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<CanonicalDevice>, StoreError>;

    /// Every device whose metadata contains `key`, regardless of value.
    /// Backfill scans use this and filter tombstones caller-side.
    async fn list_devices_with_metadata_key(
        &self,
        key: &str,
    ) -> Result<Vec<CanonicalDevice>, StoreError>;

    /// Of `ids`, the ones that still exist and are not already merged.
    /// Callers chunk to ≤1000 ids per call.
    async fn existing_unmerged_ids(
        &self,
        ids: &[DeviceId],
    ) -> Result<Vec<DeviceId>, StoreError>;

    /// Append a batch of device updates to the ingest stream.
    async fn publish_device_updates(&self, updates: &[DeviceUpdate]) -> Result<(), StoreError>;

    /// IP-only devices (no strong identity) with no activity since `cutoff`.
    async fn list_stale_ip_only_devices(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<CanonicalDevice>, StoreError>;

    async fn soft_delete_device(&self, id: &DeviceId) -> Result<(), StoreError>;

    /// Delete-and-return all network sightings whose TTL has lapsed at `now`.
    async fn expire_network_sightings(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Sighting>, StoreError>;

    async fn append_sighting_event(&self, event: &SightingEvent) -> Result<(), StoreError>;
}
