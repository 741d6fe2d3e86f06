use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use radar_domain::PollerId;
use radar_store::{
    ServiceRecord, ServiceStatus, SysmonBatch, SysmonRow, TelemetryStore, TimeseriesMetric,
};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Per-poller write buffers for the four telemetry streams.
///
/// Each buffer sits under its own mutex so the four flushes can run
/// concurrently without contending. Within one poller, rows flush in
/// arrival order; across pollers there is no ordering.
#[derive(Default)]
pub struct IngestBuffers {
    metrics: Mutex<HashMap<PollerId, Vec<TimeseriesMetric>>>,
    statuses: Mutex<HashMap<PollerId, Vec<ServiceStatus>>>,
    services: Mutex<HashMap<PollerId, Vec<ServiceRecord>>>,
    sysmon: Mutex<HashMap<PollerId, Vec<SysmonBatch>>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferCounts {
    pub metrics: usize,
    pub statuses: usize,
    pub services: usize,
    pub sysmon: usize,
}

impl IngestBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_metrics(&self, poller: &PollerId, rows: Vec<TimeseriesMetric>) {
        if rows.is_empty() {
            return;
        }
        let mut guard = self.metrics.lock().await;
        guard.entry(poller.clone()).or_default().extend(rows);
    }

    pub async fn add_service_statuses(&self, poller: &PollerId, rows: Vec<ServiceStatus>) {
        if rows.is_empty() {
            return;
        }
        let mut guard = self.statuses.lock().await;
        guard.entry(poller.clone()).or_default().extend(rows);
    }

    pub async fn add_services(&self, poller: &PollerId, rows: Vec<ServiceRecord>) {
        if rows.is_empty() {
            return;
        }
        let mut guard = self.services.lock().await;
        guard.entry(poller.clone()).or_default().extend(rows);
    }

    pub async fn add_sysmon(&self, poller: &PollerId, rows: Vec<SysmonBatch>) {
        if rows.is_empty() {
            return;
        }
        let mut guard = self.sysmon.lock().await;
        guard.entry(poller.clone()).or_default().extend(rows);
    }

    /// Buffered row totals across pollers, for the status endpoint.
    pub async fn counts(&self) -> BufferCounts {
        BufferCounts {
            metrics: self.metrics.lock().await.values().map(Vec::len).sum(),
            statuses: self.statuses.lock().await.values().map(Vec::len).sum(),
            services: self.services.lock().await.values().map(Vec::len).sum(),
            sysmon: self.sysmon.lock().await.values().map(Vec::len).sum(),
        }
    }

    /// Flush all four buffers concurrently. Each flush snapshots and clears
    /// its buffer under the lock, then writes outside it; a failed write
    /// logs and drops the snapshot (telemetry is idempotent at source, so
    /// the next poll re-reports).
    pub async fn flush_once(&self, store: &dyn TelemetryStore) {
        tokio::join!(
            async {
                let drained: Vec<_> = self.metrics.lock().await.drain().collect();
                for (poller, rows) in drained {
                    if let Err(e) = store.write_timeseries_metrics(&poller, &rows).await {
                        warn!(poller = %poller, rows = rows.len(), error = %e, "metrics flush failed; dropping");
                    }
                }
            },
            async {
                let drained: Vec<_> = self.statuses.lock().await.drain().collect();
                for (poller, rows) in drained {
                    if let Err(e) = store.write_service_statuses(&poller, &rows).await {
                        warn!(poller = %poller, rows = rows.len(), error = %e, "status flush failed; dropping");
                    }
                }
            },
            async {
                let drained: Vec<_> = self.services.lock().await.drain().collect();
                for (poller, rows) in drained {
                    if let Err(e) = store.write_services(&poller, &rows).await {
                        warn!(poller = %poller, rows = rows.len(), error = %e, "service flush failed; dropping");
                    }
                }
            },
            async {
                let drained: Vec<_> = self.sysmon.lock().await.drain().collect();
                for (poller, batches) in drained {
                    // Stamp each batch with the identity from its first
                    // non-empty subfield (cpu → disk → memory). A batch
                    // with no timestamped subfield has no row key.
                    let mut rows = Vec::with_capacity(batches.len());
                    for batch in batches {
                        match SysmonRow::from_batch(batch) {
                            Some(row) => rows.push(row),
                            None => {
                                warn!(poller = %poller, "dropping sysmon batch with no timestamped subfield")
                            }
                        }
                    }
                    if rows.is_empty() {
                        continue;
                    }
                    if let Err(e) = store.write_sysmon_metrics(&poller, &rows).await {
                        warn!(poller = %poller, rows = rows.len(), error = %e, "sysmon flush failed; dropping");
                    }
                }
            },
        );
    }
}

/// Spawn the periodic flush loop. A final flush runs on shutdown so
/// buffered telemetry isn't lost across a clean stop.
pub fn spawn_flush_loop(
    buffers: Arc<IngestBuffers>,
    store: Arc<dyn TelemetryStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("flushing ingest buffers");
                    buffers.flush_once(store.as_ref()).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        buffers.flush_once(store.as_ref()).await;
                        info!("ingest flush loop shutting down");
                        return;
                    }
                }
            }
        }
    })
}
