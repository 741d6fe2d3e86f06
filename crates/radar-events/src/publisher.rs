use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use async_nats::jetstream;
use async_nats::{ConnectOptions, Event};
use chrono::{DateTime, Utc};
use radar_config::BusConfig;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::PublishError;

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);
const SUBJECT_POLLER_OFFLINE: &str = "events.poller.offline";

/// Error fragments that mean the connection itself is gone and a reinit
/// is worth scheduling.
const CONNECTION_ERROR_MARKERS: &[&str] = &[
    "connection closed",
    "no servers",
    "invalid connection",
    "connection reset",
    "broken pipe",
];

pub fn is_connection_error(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    CONNECTION_ERROR_MARKERS.iter().any(|m| message.contains(m))
}

/// Single-flight gate for the reinit worker: concurrent triggers collapse
/// to one active attempt.
#[derive(Debug, Default)]
pub struct ReinitGate {
    active: StdMutex<bool>,
}

impl ReinitGate {
    /// Claim the gate. Returns false when a worker is already active.
    pub fn try_begin(&self) -> bool {
        let mut active = self.active.lock().expect("reinit gate poisoned");
        if *active {
            return false;
        }
        *active = true;
        true
    }

    pub fn end(&self) {
        *self.active.lock().expect("reinit gate poisoned") = false;
    }
}

/// At-least-once event publisher over a JetStream-backed bus.
///
/// Consumers MUST tolerate duplicate delivery: a publish whose ack is lost
/// in a disconnect may be retried by the caller after the background
/// reinit brings the connection back.
pub struct EventPublisher {
    cfg: BusConfig,
    context: Mutex<Option<jetstream::Context>>,
    gate: ReinitGate,
    shutdown: watch::Receiver<bool>,
    /// Backreference for the connection event callback and the spawned
    /// reinit worker; set once in `connect`.
    self_ref: StdMutex<Weak<EventPublisher>>,
}

impl EventPublisher {
    /// Open the bus connection and ensure the configured stream exists.
    pub async fn connect(
        cfg: BusConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Arc<Self>, PublishError> {
        let publisher = Arc::new(EventPublisher {
            cfg,
            context: Mutex::new(None),
            gate: ReinitGate::default(),
            shutdown,
            self_ref: StdMutex::new(Weak::new()),
        });
        *publisher.self_ref.lock().expect("self_ref poisoned") = Arc::downgrade(&publisher);
        publisher.init().await?;
        Ok(publisher)
    }

    fn weak(&self) -> Weak<EventPublisher> {
        self.self_ref.lock().expect("self_ref poisoned").clone()
    }

    async fn init(&self) -> Result<(), PublishError> {
        let mut options = ConnectOptions::new().name("serviceradar-core");
        if let Some(path) = &self.cfg.credentials_path {
            options = options
                .credentials_file(path)
                .await
                .map_err(|e| PublishError::Connect(format!("credentials: {}", e)))?;
        }

        let weak = self.weak();
        options = options.event_callback(move |event| {
            let publisher = weak.clone();
            async move {
                match event {
                    Event::Disconnected => warn!("bus connection lost"),
                    Event::Connected => info!("bus connection (re)established"),
                    Event::Closed => {
                        warn!("bus connection closed; scheduling reinit");
                        if let Some(publisher) = publisher.upgrade() {
                            publisher.schedule_reinit();
                        }
                    }
                    other => debug!(event = %other, "bus event"),
                }
            }
        });

        let client = options
            .connect(&self.cfg.url)
            .await
            .map_err(|e| PublishError::Connect(e.to_string()))?;
        info!(url = %self.cfg.url, "connected to event bus");

        let context = match &self.cfg.domain {
            Some(domain) => jetstream::with_domain(client, domain.clone()),
            None => jetstream::new(client),
        };
        context
            .get_or_create_stream(jetstream::stream::Config {
                name: self.cfg.stream.clone(),
                subjects: self.cfg.subjects.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| PublishError::Stream(e.to_string()))?;

        // Swap under the lock; the displaced connection (if any) drops
        // outside it.
        let old = {
            let mut guard = self.context.lock().await;
            guard.replace(context)
        };
        drop(old);
        Ok(())
    }

    /// Trigger a background reinit. Concurrent triggers while one is
    /// active are no-ops.
    pub fn schedule_reinit(&self) {
        if !self.gate.try_begin() {
            debug!("reinit already in flight");
            return;
        }
        let Some(publisher) = self.weak().upgrade() else {
            self.gate.end();
            return;
        };
        tokio::spawn(async move {
            publisher.reinit_with_backoff().await;
            publisher.gate.end();
        });
    }

    async fn reinit_with_backoff(&self) {
        let mut backoff = BACKOFF_INITIAL;
        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                info!("shutdown during bus reinit; aborting");
                return;
            }
            match self.init().await {
                Ok(()) => {
                    info!("bus reinit complete");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, backoff_secs = backoff.as_secs(), "bus reinit failed; backing off");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("shutdown during bus reinit backoff; aborting");
                        return;
                    }
                }
            }
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }
    }

    /// Publish one self-describing JSON event and await its ack.
    ///
    /// Connection-class failures never surface: they log, schedule a
    /// reinit, and return Ok; the caller's next attempt after reinit
    /// redelivers (hence at-least-once end to end).
    pub async fn publish_event(
        &self,
        subject: &str,
        payload: &serde_json::Value,
    ) -> Result<(), PublishError> {
        let bytes = serde_json::to_vec(payload)?;
        let context = { self.context.lock().await.clone() };
        let Some(context) = context else {
            debug!(subject, "bus not connected; scheduling reinit and dropping event");
            self.schedule_reinit();
            return Ok(());
        };

        let result = async {
            context
                .publish(subject.to_string(), bytes.into())
                .await
                .map_err(|e| e.to_string())?
                .await
                .map_err(|e| e.to_string())
        }
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(message) if is_connection_error(&message) => {
                warn!(subject, error = %message, "publish hit a dead connection; scheduling reinit");
                self.schedule_reinit();
                Ok(())
            }
            Err(message) => Err(PublishError::Publish(message)),
        }
    }

    /// Typed helper: a poller stopped reporting.
    pub async fn publish_poller_offline(
        &self,
        poller_id: &str,
        last_seen: DateTime<Utc>,
    ) -> Result<(), PublishError> {
        self.publish_event(
            SUBJECT_POLLER_OFFLINE,
            &serde_json::json!({
                "event_type": "poller_offline",
                "poller_id": poller_id,
                "last_seen": last_seen,
                "reported_at": Utc::now(),
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_match_the_known_set() {
        assert!(is_connection_error("nats: Connection Closed"));
        assert!(is_connection_error("no servers remaining to try"));
        assert!(is_connection_error("invalid connection state"));
        assert!(!is_connection_error("stream not found"));
        assert!(!is_connection_error("message too large"));
    }

    #[test]
    fn reinit_gate_is_single_flight() {
        let gate = ReinitGate::default();
        assert!(gate.try_begin());
        // A second trigger while active collapses to a no-op.
        assert!(!gate.try_begin());
        gate.end();
        assert!(gate.try_begin());
    }
}
