use async_trait::async_trait;
use radar_domain::PollerId;

use crate::error::StoreError;
use crate::rows::{
    DiscoveredInterface, ServiceRecord, ServiceStatus, SysmonRow, TimeseriesMetric,
    TopologyEvent,
};

/// Write-side interface for the telemetry tables. All writes are batch
/// appends; the flush loop calls these with whole buffer snapshots.
#[async_trait]
pub trait TelemetryStore: Send + Sync + 'static {
    async fn write_timeseries_metrics(
        &self,
        poller_id: &PollerId,
        rows: &[TimeseriesMetric],
    ) -> Result<(), StoreError>;

    async fn write_service_statuses(
        &self,
        poller_id: &PollerId,
        rows: &[ServiceStatus],
    ) -> Result<(), StoreError>;

    async fn write_services(
        &self,
        poller_id: &PollerId,
        rows: &[ServiceRecord],
    ) -> Result<(), StoreError>;

    /// Sysmon rows arrive already stamped with the identity extracted
    /// from the batch's first non-empty subfield (cpu → disk → memory).
    async fn write_sysmon_metrics(
        &self,
        poller_id: &PollerId,
        rows: &[SysmonRow],
    ) -> Result<(), StoreError>;

    async fn write_interfaces(&self, rows: &[DiscoveredInterface]) -> Result<(), StoreError>;

    async fn write_topology_events(&self, rows: &[TopologyEvent]) -> Result<(), StoreError>;
}
