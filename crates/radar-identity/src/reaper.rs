use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use radar_store::{DeviceStore, SightingEvent, StoreError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One sighting-reaper tick: expire lapsed network sightings and append
/// one `expired` event per row.
pub async fn reap_expired_sightings(store: &dyn DeviceStore) -> Result<usize, StoreError> {
    let now = Utc::now();
    let expired = store.expire_network_sightings(now).await?;
    for sighting in &expired {
        store
            .append_sighting_event(&SightingEvent {
                event_type: "expired".to_string(),
                actor: "system".to_string(),
                details: serde_json::json!({
                    "ip": sighting.ip,
                    "partition": sighting.partition,
                }),
                created_at: now,
            })
            .await?;
    }
    Ok(expired.len())
}

/// One stale-device tick: soft-delete IP-only devices idle past `ttl`.
pub async fn reap_stale_devices(
    store: &dyn DeviceStore,
    ttl: chrono::Duration,
) -> Result<usize, StoreError> {
    let cutoff = Utc::now() - ttl;
    let stale = store.list_stale_ip_only_devices(cutoff).await?;
    let mut removed = 0;
    for device in &stale {
        match store.soft_delete_device(&device.device_id).await {
            Ok(()) => removed += 1,
            // Per-row failures don't abort the sweep.
            Err(e) => warn!(device_id = %device.device_id, error = %e, "stale device soft-delete failed"),
        }
    }
    Ok(removed)
}

/// Spawn the periodic identity reaper. Both passes run each tick and are
/// best-effort; the task exits when `shutdown` flips true.
pub fn spawn_reaper(
    interval: Duration,
    stale_device_ttl: chrono::Duration,
    store: Arc<dyn DeviceStore>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match reap_expired_sightings(store.as_ref()).await {
                        Ok(0) => {}
                        Ok(n) => debug!(expired = n, "expired network sightings"),
                        Err(e) => warn!(error = %e, "sighting reaper tick failed"),
                    }
                    match reap_stale_devices(store.as_ref(), stale_device_ttl).await {
                        Ok(0) => {}
                        Ok(n) => debug!(removed = n, "soft-deleted stale ip-only devices"),
                        Err(e) => warn!(error = %e, "stale device reaper tick failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("identity reaper shutting down");
                        return;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use radar_domain::{DeviceId, DeviceSource, DeviceUpdate, Sighting};
    use radar_store::InMemoryStore;
    use std::collections::HashMap;
    use uuid::Uuid;

    #[tokio::test]
    async fn expired_sightings_produce_events() {
        let store = InMemoryStore::with_sighting_ttl(chrono::Duration::hours(1));
        let now = Utc::now();
        store
            .add_sighting(Sighting {
                sighting_id: Uuid::new_v4(),
                ip: "10.0.0.1".into(),
                partition: "edge".into(),
                first_seen: now - chrono::Duration::hours(4),
                last_seen: now - chrono::Duration::hours(2),
                metadata: HashMap::new(),
            })
            .await;

        let n = reap_expired_sightings(&store).await.unwrap();
        assert_eq!(n, 1);

        let events = store.sighting_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "expired");
        assert_eq!(events[0].actor, "system");
        assert_eq!(events[0].details["ip"], "10.0.0.1");
        assert_eq!(events[0].details["partition"], "edge");
    }

    #[tokio::test]
    async fn stale_ip_only_devices_get_soft_deleted() {
        let store = InMemoryStore::new();
        let old = Utc::now() - chrono::Duration::days(30);
        store
            .publish_device_updates(&[DeviceUpdate {
                device_id: Some(DeviceId::new("default:10.0.0.9")),
                partition: "default".into(),
                ip: "10.0.0.9".into(),
                source: DeviceSource::Sweep,
                timestamp: old,
                is_available: true,
                metadata: HashMap::new(),
                hostname: None,
                mac: None,
            }])
            .await
            .unwrap();

        let n = reap_stale_devices(&store, chrono::Duration::days(7)).await.unwrap();
        assert_eq!(n, 1);
        let dev = store
            .get_device(&DeviceId::new("default:10.0.0.9"))
            .await
            .unwrap()
            .unwrap();
        assert!(dev.is_soft_deleted());

        // Soft-deleted rows leave the stale set; the next tick is a no-op.
        let n = reap_stale_devices(&store, chrono::Duration::days(7)).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn devices_with_strong_identity_are_kept() {
        let store = InMemoryStore::new();
        let old = Utc::now() - chrono::Duration::days(30);
        let mut metadata = HashMap::new();
        metadata.insert(radar_domain::update::ARMIS_DEVICE_ID.to_string(), "ARM-9".into());
        store
            .publish_device_updates(&[DeviceUpdate {
                device_id: Some(DeviceId::new("default:10.0.0.8")),
                partition: "default".into(),
                ip: "10.0.0.8".into(),
                source: DeviceSource::Armis,
                timestamp: old,
                is_available: true,
                metadata,
                hostname: None,
                mac: None,
            }])
            .await
            .unwrap();

        let n = reap_stale_devices(&store, chrono::Duration::days(7)).await.unwrap();
        assert_eq!(n, 0);
    }
}
