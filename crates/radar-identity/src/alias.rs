use std::collections::HashMap;

use radar_domain::{update, DeviceUpdate, LifecycleEvent};
use radar_store::DeviceStore;

use crate::error::ResolveError;

/// Diff a batch of incoming updates against current canonical metadata and
/// emit one `alias_updated` event per device whose last-seen alias service
/// changed. Re-processing an identical batch emits nothing.
pub async fn build_alias_events(
    store: &dyn DeviceStore,
    updates: &[DeviceUpdate],
) -> Result<Vec<LifecycleEvent>, ResolveError> {
    let mut events = Vec::new();

    for u in updates {
        let Some(incoming) = u.metadata.get(update::ALIAS_LAST_SEEN_SERVICE_ID) else {
            continue;
        };
        let Some(device_id) = &u.device_id else {
            continue;
        };
        let Some(existing) = store.get_device(device_id).await? else {
            continue;
        };

        let previous = existing
            .metadata
            .get(update::ALIAS_LAST_SEEN_SERVICE_ID)
            .cloned()
            .unwrap_or_default();
        if previous == *incoming {
            continue;
        }

        let mut metadata = HashMap::new();
        metadata.insert("alias_current_service_id".to_string(), incoming.clone());
        metadata.insert("previous_service_id".to_string(), previous);
        events.push(LifecycleEvent {
            action: "alias_updated".to_string(),
            reason: "alias_change".to_string(),
            device_id: device_id.clone(),
            severity: "Low".to_string(),
            level: 6,
            metadata,
        });
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use radar_domain::{partition_of, DeviceId, DeviceSource};
    use radar_store::InMemoryStore;
    use std::sync::Arc;

    fn aliased_update(id: &str, service_id: &str) -> DeviceUpdate {
        let mut metadata = HashMap::new();
        metadata.insert(
            update::ALIAS_LAST_SEEN_SERVICE_ID.to_string(),
            service_id.to_string(),
        );
        DeviceUpdate {
            device_id: Some(DeviceId::new(id)),
            partition: partition_of(id).to_string(),
            ip: id.split_once(':').map(|(_, ip)| ip).unwrap_or("").to_string(),
            source: DeviceSource::SelfReported,
            timestamp: Utc::now(),
            is_available: true,
            metadata,
            hostname: None,
            mac: None,
        }
    }

    #[tokio::test]
    async fn alias_change_emits_single_event() {
        let store = Arc::new(InMemoryStore::new());
        store
            .publish_device_updates(&[aliased_update("default:10.0.0.1", "serviceradar:agent:old")])
            .await
            .unwrap();

        let incoming = aliased_update("default:10.0.0.1", "serviceradar:agent:new");
        let events = build_alias_events(store.as_ref(), &[incoming]).await.unwrap();

        assert_eq!(events.len(), 1);
        let ev = &events[0];
        assert_eq!(ev.action, "alias_updated");
        assert_eq!(ev.reason, "alias_change");
        assert_eq!(ev.severity, "Low");
        assert_eq!(ev.level, 6);
        assert_eq!(
            ev.metadata.get("alias_current_service_id").map(String::as_str),
            Some("serviceradar:agent:new")
        );
        assert_eq!(
            ev.metadata.get("previous_service_id").map(String::as_str),
            Some("serviceradar:agent:old")
        );
    }

    #[tokio::test]
    async fn unchanged_alias_emits_nothing() {
        let store = Arc::new(InMemoryStore::new());
        store
            .publish_device_updates(&[aliased_update("default:10.0.0.1", "serviceradar:agent:same")])
            .await
            .unwrap();

        let incoming = aliased_update("default:10.0.0.1", "serviceradar:agent:same");
        let events = build_alias_events(store.as_ref(), &[incoming]).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn reprocessing_after_apply_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        store
            .publish_device_updates(&[aliased_update("default:10.0.0.1", "serviceradar:agent:a")])
            .await
            .unwrap();

        let incoming = aliased_update("default:10.0.0.1", "serviceradar:agent:b");
        let first = build_alias_events(store.as_ref(), &[incoming.clone()]).await.unwrap();
        assert_eq!(first.len(), 1);

        // Once the update lands, the same batch produces nothing.
        store.publish_device_updates(&[incoming.clone()]).await.unwrap();
        let second = build_alias_events(store.as_ref(), &[incoming]).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn updates_without_alias_metadata_are_ignored() {
        let store = Arc::new(InMemoryStore::new());
        let mut plain = aliased_update("default:10.0.0.2", "x");
        plain.metadata.clear();
        let events = build_alias_events(store.as_ref(), &[plain]).await.unwrap();
        assert!(events.is_empty());
    }
}
