//! Row shapes for the tables owned by the storage engine. The core writes
//! these through the store traits and never reads most of them back.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Telemetry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeseriesMetric {
    pub metric_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub device_id: Option<String>,
    pub partition: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service_name: String,
    pub service_type: String,
    pub available: bool,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub partition: String,
}

/// Service inventory row: which checks exist where, independent of status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub service_name: String,
    pub service_type: String,
    pub agent_id: String,
    pub partition: String,
    pub config: Option<serde_json::Value>,
}

// ── Sysmon ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuMetric {
    pub core_id: i32,
    pub usage_percent: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub agent_id: Option<String>,
    pub host_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskMetric {
    pub mount_point: String,
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub agent_id: Option<String>,
    pub host_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetric {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub agent_id: Option<String>,
    pub host_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SysmonMetrics {
    #[serde(default)]
    pub cpus: Vec<CpuMetric>,
    #[serde(default)]
    pub disks: Vec<DiskMetric>,
    #[serde(default)]
    pub memory: Vec<MemoryMetric>,
}

/// One buffered sysmon submission from a poller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SysmonBatch {
    pub partition: String,
    pub metrics: SysmonMetrics,
}

impl SysmonBatch {
    /// Timestamp and agent/host identity of the batch, extracted from the
    /// first non-empty subfield: cpu → disk → memory.
    pub fn identity(&self) -> Option<(DateTime<Utc>, String, String)> {
        if let Some(c) = self.metrics.cpus.first() {
            return extract(c.timestamp, &c.agent_id, &c.host_id);
        }
        if let Some(d) = self.metrics.disks.first() {
            return extract(d.timestamp, &d.agent_id, &d.host_id);
        }
        if let Some(m) = self.metrics.memory.first() {
            return extract(m.timestamp, &m.agent_id, &m.host_id);
        }
        None
    }
}

fn extract(
    ts: Option<DateTime<Utc>>,
    agent: &Option<String>,
    host: &Option<String>,
) -> Option<(DateTime<Utc>, String, String)> {
    Some((
        ts?,
        agent.clone().unwrap_or_default(),
        host.clone().unwrap_or_default(),
    ))
}

/// A sysmon batch stamped with the identity its storage rows are keyed by.
/// Built at flush time; batches with no timestamped subfield never reach
/// storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SysmonRow {
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub host_id: String,
    pub partition: String,
    pub metrics: SysmonMetrics,
}

impl SysmonRow {
    pub fn from_batch(batch: SysmonBatch) -> Option<SysmonRow> {
        let (timestamp, agent_id, host_id) = batch.identity()?;
        Some(SysmonRow {
            timestamp,
            agent_id,
            host_id,
            partition: batch.partition,
            metrics: batch.metrics,
        })
    }
}

// ── Discovery ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredInterface {
    pub device_ip: String,
    pub device_id: Option<String>,
    pub if_index: i32,
    pub if_name: Option<String>,
    pub if_descr: Option<String>,
    pub if_speed: Option<u64>,
    pub if_phys_address: Option<String>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    pub if_admin_status: Option<i32>,
    pub if_oper_status: Option<i32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// One observed link between two devices (LLDP/CDP/BGP neighborship).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyEvent {
    pub protocol: String,
    pub local_device_id: String,
    pub local_if_index: i32,
    pub local_if_name: Option<String>,
    pub remote_chassis_id: Option<String>,
    pub remote_port_id: Option<String>,
    pub remote_system_name: Option<String>,
    pub remote_device_ip: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub poller_id: String,
}

// ── Sighting events ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SightingEvent {
    pub event_type: String,
    pub actor: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysmon_identity_prefers_cpu_then_disk_then_memory() {
        let ts = Utc::now();
        let mut batch = SysmonBatch::default();
        assert!(batch.identity().is_none());

        batch.metrics.memory.push(MemoryMetric {
            timestamp: Some(ts),
            agent_id: Some("mem-agent".into()),
            host_id: Some("host-1".into()),
            ..Default::default()
        });
        assert_eq!(batch.identity().unwrap().1, "mem-agent");

        batch.metrics.disks.push(DiskMetric {
            timestamp: Some(ts),
            agent_id: Some("disk-agent".into()),
            host_id: Some("host-1".into()),
            ..Default::default()
        });
        assert_eq!(batch.identity().unwrap().1, "disk-agent");

        batch.metrics.cpus.push(CpuMetric {
            timestamp: Some(ts),
            agent_id: Some("cpu-agent".into()),
            host_id: Some("host-1".into()),
            ..Default::default()
        });
        assert_eq!(batch.identity().unwrap().1, "cpu-agent");
    }

    #[test]
    fn sysmon_row_requires_an_attributable_batch() {
        let ts = Utc::now();
        let mut batch = SysmonBatch { partition: "edge".into(), ..Default::default() };
        assert!(SysmonRow::from_batch(batch.clone()).is_none());

        batch.metrics.disks.push(DiskMetric {
            mount_point: "/".into(),
            timestamp: Some(ts),
            agent_id: Some("agent-1".into()),
            host_id: Some("host-1".into()),
            ..Default::default()
        });
        let row = SysmonRow::from_batch(batch).unwrap();
        assert_eq!(row.timestamp, ts);
        assert_eq!(row.agent_id, "agent-1");
        assert_eq!(row.partition, "edge");
        assert_eq!(row.metrics.disks.len(), 1);
    }
}
