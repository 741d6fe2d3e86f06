use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use radar_store::OnboardingStore;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type ChangeCallback = Arc<dyn Fn(&HashSet<String>) + Send + Sync>;

/// The in-memory set of poller ids whose ingress is currently admitted.
///
/// Readers sit on the hot ingest path and take the read lock; the refresh
/// loop swaps the whole set under the write lock. Issue/revoke/delete also
/// update it synchronously so the gate doesn't lag a refresh tick.
#[derive(Default)]
pub struct AllowedPollers {
    set: RwLock<HashSet<String>>,
    callback: std::sync::Mutex<Option<ChangeCallback>>,
}

impl AllowedPollers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the callback fired after every mutation (used by the
    /// transport layer to drop connections from newly-rejected pollers).
    pub fn on_change(&self, cb: impl Fn(&HashSet<String>) + Send + Sync + 'static) {
        *self.callback.lock().expect("callback lock poisoned") = Some(Arc::new(cb));
    }

    pub async fn contains(&self, poller_id: &str) -> bool {
        self.set.read().await.contains(poller_id)
    }

    pub async fn len(&self) -> usize {
        self.set.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.set.read().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<String> {
        let mut out: Vec<String> = self.set.read().await.iter().cloned().collect();
        out.sort();
        out
    }

    pub async fn insert(&self, poller_id: &str) {
        let snapshot = {
            let mut guard = self.set.write().await;
            if !guard.insert(poller_id.to_string()) {
                return;
            }
            guard.clone()
        };
        self.fire(&snapshot);
    }

    pub async fn remove(&self, poller_id: &str) {
        let snapshot = {
            let mut guard = self.set.write().await;
            if !guard.remove(poller_id) {
                return;
            }
            guard.clone()
        };
        self.fire(&snapshot);
    }

    /// Replace the whole set with a fresh snapshot from storage.
    pub async fn replace(&self, pollers: impl IntoIterator<Item = String>) {
        let snapshot = {
            let mut guard = self.set.write().await;
            let next: HashSet<String> = pollers.into_iter().collect();
            if *guard == next {
                return;
            }
            *guard = next;
            guard.clone()
        };
        self.fire(&snapshot);
    }

    fn fire(&self, snapshot: &HashSet<String>) {
        let cb = self.callback.lock().expect("callback lock poisoned").clone();
        if let Some(cb) = cb {
            cb(snapshot);
        }
    }
}

/// Spawn the periodic allowed-pollers refresh. Each refresh is bounded by
/// `timeout`; failures keep the previous snapshot.
pub fn spawn_allowed_refresh(
    allowed: Arc<AllowedPollers>,
    store: Arc<dyn OnboardingStore>,
    interval: Duration,
    timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match tokio::time::timeout(timeout, store.list_allowed_pollers()).await {
                        Ok(Ok(pollers)) => {
                            debug!(count = pollers.len(), "refreshed allowed pollers");
                            allowed.replace(pollers).await;
                        }
                        Ok(Err(e)) => warn!(error = %e, "allowed-pollers refresh failed"),
                        Err(_) => warn!(timeout_ms = timeout.as_millis() as u64, "allowed-pollers refresh timed out"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("allowed-pollers refresh shutting down");
                        return;
                    }
                }
            }
        }
    })
}
