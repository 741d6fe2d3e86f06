use std::sync::Arc;

use radar_domain::{CanonicalRecord, IdentityKind};
use radar_store::{KvError, KvStore};
use tracing::{debug, warn};

/// Mirror of canonical identity records in the configuration KV store,
/// keyed `identity/{namespace}/{kind}/{value}`. Written opportunistically
/// by the backfill reconciler so edge tiers can answer identity lookups
/// without a storage round trip.
pub struct IdentityKvMirror {
    kv: Arc<dyn KvStore>,
    namespace: String,
}

impl IdentityKvMirror {
    pub fn new(kv: Arc<dyn KvStore>, namespace: impl Into<String>) -> Self {
        IdentityKvMirror { kv, namespace: namespace.into() }
    }

    pub fn key(&self, kind: IdentityKind, value: &str) -> String {
        format!("identity/{}/{}/{}", self.namespace, kind, value)
    }

    /// Seed one identity mapping. Create-if-absent first; when the key
    /// already exists, rewrite it only if the stored record's metadata
    /// hash differs, at the witnessed revision. A lost revision race means
    /// another writer observed fresher state; it is not retried.
    ///
    /// Returns whether a write happened.
    pub async fn seed(
        &self,
        kind: IdentityKind,
        value: &str,
        record: &CanonicalRecord,
    ) -> Result<bool, KvError> {
        let key = self.key(kind, value);
        let payload = serde_json::to_vec(record)
            .map_err(|e| KvError::Unavailable(format!("encode identity record: {}", e)))?;

        match self.kv.put_if_absent(&key, &payload).await {
            Ok(_) => return Ok(true),
            Err(KvError::AlreadyExists(_)) => {}
            Err(KvError::Unimplemented) => {
                debug!(key = %key, "kv backend lacks put_if_absent; skipping mirror seed");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        let Some(existing) = self.kv.get(&key).await? else {
            // Deleted between the two calls; the next backfill converges it.
            return Ok(false);
        };

        let stored_hash = serde_json::from_slice::<CanonicalRecord>(&existing.value)
            .map(|r| r.metadata_hash)
            .unwrap_or_default();
        if stored_hash == record.metadata_hash {
            return Ok(false);
        }

        match self.kv.update(&key, &payload, existing.revision).await {
            Ok(_) => Ok(true),
            Err(KvError::Aborted(_)) => {
                debug!(key = %key, "identity mirror update lost a race; leaving winner in place");
                Ok(false)
            }
            Err(KvError::Unimplemented) => Ok(false),
            Err(e) => {
                warn!(key = %key, error = %e, "identity mirror update failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use radar_domain::{CanonicalAttrs, DeviceId};
    use radar_store::InMemoryKv;

    fn record(hash: &str) -> CanonicalRecord {
        CanonicalRecord {
            canonical_device_id: DeviceId::new("default:10.0.0.1"),
            partition: "default".into(),
            metadata_hash: hash.into(),
            attributes: CanonicalAttrs::default(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn seeds_fresh_key() {
        let kv = Arc::new(InMemoryKv::new());
        let mirror = IdentityKvMirror::new(kv.clone(), "default");
        assert!(mirror.seed(IdentityKind::Ip, "10.0.0.1", &record("h1")).await.unwrap());

        let entry = kv.get("identity/default/ip/10.0.0.1").await.unwrap().unwrap();
        let stored: CanonicalRecord = serde_json::from_slice(&entry.value).unwrap();
        assert_eq!(stored.metadata_hash, "h1");
    }

    #[tokio::test]
    async fn rewrites_only_on_hash_change() {
        let kv = Arc::new(InMemoryKv::new());
        let mirror = IdentityKvMirror::new(kv.clone(), "default");
        mirror.seed(IdentityKind::Ip, "10.0.0.1", &record("h1")).await.unwrap();

        // Same hash: no write, revision unchanged.
        assert!(!mirror.seed(IdentityKind::Ip, "10.0.0.1", &record("h1")).await.unwrap());
        let entry = kv.get("identity/default/ip/10.0.0.1").await.unwrap().unwrap();
        assert_eq!(entry.revision, 1);

        // Changed hash: compare-and-swap at the witnessed revision.
        assert!(mirror.seed(IdentityKind::Ip, "10.0.0.1", &record("h2")).await.unwrap());
        let entry = kv.get("identity/default/ip/10.0.0.1").await.unwrap().unwrap();
        assert_eq!(entry.revision, 2);
    }
}
