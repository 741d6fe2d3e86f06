use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use radar_domain::{ComponentType, OnboardingPackage};
use serde::Serialize;
use tokio::sync::RwLock;

/// Short-TTL cache in front of activation lookups. Activation is called on
/// every poll, so negative entries matter as much as positive ones: they
/// keep nonexistent component ids from hammering storage.
pub struct ActivationCache {
    ttl: chrono::Duration,
    map: RwLock<HashMap<String, CacheEntry>>,
    lookups: AtomicU64,
    hits: AtomicU64,
    negative_hits: AtomicU64,
    misses: AtomicU64,
    stale_evicted: AtomicU64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    package: Option<OnboardingPackage>,
    expires_at: DateTime<Utc>,
    found: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub lookups: u64,
    pub hits: u64,
    pub negative_hits: u64,
    pub misses: u64,
    pub stale_evicted: u64,
}

#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit(Box<OnboardingPackage>),
    NegativeHit,
    Miss,
}

fn cache_key(component_type: ComponentType, component_id: &str) -> String {
    format!("{}:{}", component_type, component_id)
}

impl ActivationCache {
    pub fn new(ttl: chrono::Duration) -> Self {
        ActivationCache {
            ttl,
            map: RwLock::new(HashMap::new()),
            lookups: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            negative_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_evicted: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, component_type: ComponentType, component_id: &str) -> CacheLookup {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let key = cache_key(component_type, component_id);
        let now = Utc::now();

        let stale = {
            let guard = self.map.read().await;
            match guard.get(&key) {
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return CacheLookup::Miss;
                }
                Some(entry) if entry.expires_at > now => {
                    return if entry.found {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        match &entry.package {
                            Some(pkg) => CacheLookup::Hit(Box::new(pkg.clone())),
                            None => CacheLookup::Miss,
                        }
                    } else {
                        self.negative_hits.fetch_add(1, Ordering::Relaxed);
                        CacheLookup::NegativeHit
                    };
                }
                Some(_) => true,
            }
        };

        if stale {
            let mut guard = self.map.write().await;
            // Re-check: a writer may have refreshed the entry meanwhile.
            if guard.get(&key).map_or(false, |e| e.expires_at <= now) {
                guard.remove(&key);
                self.stale_evicted.fetch_add(1, Ordering::Relaxed);
            }
        }
        // Stale evictions count as misses.
        self.misses.fetch_add(1, Ordering::Relaxed);
        CacheLookup::Miss
    }

    /// Cache a package under its component key, and for pollers also under
    /// the poller key, so both lookup paths stay warm.
    pub async fn store(&self, pkg: &OnboardingPackage) {
        let expires_at = Utc::now() + self.ttl;
        let mut guard = self.map.write().await;
        guard.insert(
            cache_key(pkg.component_type, &pkg.component_id),
            CacheEntry { package: Some(pkg.clone()), expires_at, found: true },
        );
        if pkg.component_type == ComponentType::Poller {
            if let Some(poller_id) = &pkg.poller_id {
                guard.insert(
                    cache_key(ComponentType::Poller, poller_id),
                    CacheEntry { package: Some(pkg.clone()), expires_at, found: true },
                );
            }
        }
    }

    pub async fn store_negative(&self, component_type: ComponentType, component_id: &str) {
        let expires_at = Utc::now() + self.ttl;
        let mut guard = self.map.write().await;
        guard.insert(
            cache_key(component_type, component_id),
            CacheEntry { package: None, expires_at, found: false },
        );
    }

    pub async fn invalidate(&self, component_type: ComponentType, component_id: &str) {
        let mut guard = self.map.write().await;
        guard.remove(&cache_key(component_type, component_id));
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_evicted: self.stale_evicted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radar_domain::{PackageStatus, SecurityMode};
    use std::collections::HashMap as Map;
    use uuid::Uuid;

    fn package(id: &str) -> OnboardingPackage {
        let now = Utc::now();
        OnboardingPackage {
            package_id: Uuid::new_v4(),
            label: id.into(),
            component_id: id.into(),
            component_type: ComponentType::Poller,
            parent_type: None,
            parent_id: None,
            poller_id: Some(id.into()),
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
            metadata: Map::new(),
            checker_kind: None,
            checker_config_json: None,
            notes: None,
            kv_revision: None,
        }
    }

    #[tokio::test]
    async fn hit_negative_and_miss_paths() {
        let cache = ActivationCache::new(chrono::Duration::seconds(60));

        assert!(matches!(cache.get(ComponentType::Poller, "a").await, CacheLookup::Miss));

        cache.store(&package("a")).await;
        assert!(matches!(cache.get(ComponentType::Poller, "a").await, CacheLookup::Hit(_)));

        cache.store_negative(ComponentType::Agent, "ghost").await;
        assert!(matches!(
            cache.get(ComponentType::Agent, "ghost").await,
            CacheLookup::NegativeHit
        ));

        let stats = cache.stats();
        assert_eq!(stats.lookups, 3);
        assert_eq!(stats.hits + stats.negative_hits + stats.misses, stats.lookups);
    }

    #[tokio::test]
    async fn stale_entries_evict_as_misses() {
        let cache = ActivationCache::new(chrono::Duration::milliseconds(-1));
        cache.store(&package("a")).await;

        assert!(matches!(cache.get(ComponentType::Poller, "a").await, CacheLookup::Miss));
        let stats = cache.stats();
        assert_eq!(stats.stale_evicted, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits + stats.negative_hits + stats.misses, stats.lookups);
    }

    #[tokio::test]
    async fn invalidate_clears_entry() {
        let cache = ActivationCache::new(chrono::Duration::seconds(60));
        cache.store(&package("a")).await;
        cache.invalidate(ComponentType::Poller, "a").await;
        assert!(matches!(cache.get(ComponentType::Poller, "a").await, CacheLookup::Miss));
    }
}
