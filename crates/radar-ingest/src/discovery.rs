use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use radar_domain::{
    device_id_for, update, DeviceId, DeviceSource, DeviceUpdate, IdentityKey, IdentityKind,
};
use radar_identity::CanonicalResolver;
use radar_store::{
    DeviceStore, DiscoveredInterface, StoreError, TelemetryStore, TopologyEvent,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::classify::classify_device_type;
use crate::error::IngestError;

// ── Registry hook ─────────────────────────────────────────────────────────────

/// Batch-update hook the ingesters hand parsed device updates to.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn process_batch_device_updates(
        &self,
        updates: Vec<DeviceUpdate>,
    ) -> Result<(), StoreError>;
}

/// Registry backed directly by the device store's update stream.
pub struct StoreRegistry {
    store: Arc<dyn DeviceStore>,
}

impl StoreRegistry {
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        StoreRegistry { store }
    }
}

#[async_trait]
impl DeviceRegistry for StoreRegistry {
    async fn process_batch_device_updates(
        &self,
        updates: Vec<DeviceUpdate>,
    ) -> Result<(), StoreError> {
        self.store.publish_device_updates(&updates).await
    }
}

// ── Sync results ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub total: usize,
    pub batches: usize,
}

/// Ingest a sync payload: a JSON array of device updates, submitted to the
/// registry in chunks of `chunk`. A missing registry is logged and skipped,
/// not an error.
pub async fn process_sync_results(
    registry: Option<&dyn DeviceRegistry>,
    payload: &[u8],
    chunk: usize,
) -> Result<SyncStats, IngestError> {
    let value: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| IngestError::Parse(format!("sync payload is not valid JSON: {}", e)))?;
    if !value.is_array() {
        return Err(IngestError::Parse(
            "sync payload root must be a JSON array".to_string(),
        ));
    }
    let updates: Vec<DeviceUpdate> = serde_json::from_value(value)
        .map_err(|e| IngestError::Parse(format!("sync payload element: {}", e)))?;

    let mut stats = SyncStats { total: updates.len(), batches: 0 };
    let Some(registry) = registry else {
        warn!(total = stats.total, "no device registry attached; dropping sync results");
        return Ok(stats);
    };

    let chunk = chunk.max(1);
    for batch in updates.chunks(chunk) {
        registry.process_batch_device_updates(batch.to_vec()).await?;
        stats.batches += 1;
    }
    info!(total = stats.total, batches = stats.batches, "processed sync results");
    Ok(stats)
}

// ── SNMP discovery ────────────────────────────────────────────────────────────

/// Identity of the service status that carried the payload; used as the
/// fallback when the payload omits its own agent/poller ids.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub agent_id: String,
    pub poller_id: String,
    pub partition: String,
}

#[derive(Debug, Default, Deserialize)]
struct SnmpDiscoveryPayload {
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    poller_id: Option<String>,
    #[serde(default)]
    devices: Vec<SnmpDevice>,
    #[serde(default)]
    interfaces: Vec<SnmpInterface>,
    #[serde(default)]
    topology: Vec<SnmpTopologyLink>,
}

#[derive(Debug, Default, Deserialize)]
struct SnmpDevice {
    ip: String,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    mac: Option<String>,
    #[serde(default)]
    partition: Option<String>,
    #[serde(default)]
    sys_descr: Option<String>,
    #[serde(default)]
    sys_object_id: Option<String>,
    #[serde(default)]
    sys_contact: Option<String>,
    #[serde(default)]
    sys_location: Option<String>,
    #[serde(default)]
    uptime: Option<u64>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct SnmpInterface {
    #[serde(default)]
    device_ip: Option<String>,
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    if_index: i32,
    #[serde(default)]
    if_name: Option<String>,
    #[serde(default)]
    if_descr: Option<String>,
    #[serde(default)]
    if_speed: Option<u64>,
    #[serde(default)]
    if_phys_address: Option<String>,
    #[serde(default)]
    ip_addresses: Vec<String>,
    #[serde(default)]
    if_admin_status: Option<i32>,
    #[serde(default)]
    if_oper_status: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
struct SnmpTopologyLink {
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    local_device_id: Option<String>,
    #[serde(default)]
    local_ip: Option<String>,
    #[serde(default)]
    local_if_index: i32,
    #[serde(default)]
    local_if_name: Option<String>,
    #[serde(default)]
    remote_chassis_id: Option<String>,
    #[serde(default)]
    remote_port_id: Option<String>,
    #[serde(default)]
    remote_system_name: Option<String>,
    #[serde(default)]
    remote_ip: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnmpStats {
    pub devices: usize,
    pub interfaces: usize,
    pub correlated: usize,
    pub topology_events: usize,
}

/// Ingest one SNMP discovery payload: devices, then interfaces (with
/// alternate-IP correlation against the canonical inventory), then
/// topology links.
pub async fn process_snmp_discovery_results(
    registry: Option<&dyn DeviceRegistry>,
    resolver: &CanonicalResolver,
    store: &dyn DeviceStore,
    telemetry: &dyn TelemetryStore,
    payload: &[u8],
    ctx: &ServiceContext,
) -> Result<SnmpStats, IngestError> {
    let decoded: SnmpDiscoveryPayload = serde_json::from_slice(payload)
        .map_err(|e| IngestError::Parse(format!("snmp discovery payload: {}", e)))?;

    let agent_id = decoded
        .agent_id
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| ctx.agent_id.clone());
    let poller_id = decoded
        .poller_id
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| ctx.poller_id.clone());

    let mut stats = SnmpStats::default();
    let now = Utc::now();

    // Devices.
    let mut device_updates = Vec::with_capacity(decoded.devices.len());
    for dev in &decoded.devices {
        if dev.ip.is_empty() {
            continue;
        }
        let partition = dev
            .partition
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| ctx.partition.clone());

        let mut metadata = dev.metadata.clone();
        if let Some(v) = &dev.sys_descr {
            metadata.insert("sys_descr".to_string(), v.clone());
        }
        if let Some(v) = &dev.sys_object_id {
            metadata.insert("sys_object_id".to_string(), v.clone());
        }
        if let Some(v) = &dev.sys_contact {
            metadata.insert("sys_contact".to_string(), v.clone());
        }
        if let Some(v) = &dev.sys_location {
            metadata.insert("sys_location".to_string(), v.clone());
        }
        if let Some(v) = dev.uptime {
            metadata.insert("uptime".to_string(), v.to_string());
        }
        metadata.insert(
            "device_type".to_string(),
            classify_device_type(
                dev.hostname.as_deref(),
                dev.sys_descr.as_deref().unwrap_or(""),
                dev.sys_object_id.as_deref().unwrap_or(""),
            )
            .to_string(),
        );

        device_updates.push(DeviceUpdate {
            device_id: Some(DeviceId::new(device_id_for(&partition, &dev.ip))),
            partition,
            ip: dev.ip.clone(),
            source: DeviceSource::Snmp,
            timestamp: now,
            is_available: true,
            metadata,
            hostname: dev.hostname.clone(),
            mac: dev.mac.clone(),
        });
    }
    stats.devices = device_updates.len();
    match registry {
        Some(registry) if !device_updates.is_empty() => {
            registry.process_batch_device_updates(device_updates).await?;
        }
        None if stats.devices > 0 => {
            warn!(devices = stats.devices, "no device registry attached; dropping snmp devices");
        }
        _ => {}
    }

    // Interfaces: group by device IP, collect alternate IPs, correlate.
    let mut by_device: HashMap<String, Vec<&SnmpInterface>> = HashMap::new();
    let mut rows: Vec<DiscoveredInterface> = Vec::new();
    for iface in &decoded.interfaces {
        let Some(ip) = iface.device_ip.as_deref().filter(|s| !s.is_empty()) else {
            continue;
        };
        by_device.entry(ip.to_string()).or_default().push(iface);
        rows.push(DiscoveredInterface {
            device_ip: ip.to_string(),
            device_id: iface.device_id.clone(),
            if_index: iface.if_index,
            if_name: iface.if_name.clone(),
            if_descr: iface.if_descr.clone(),
            if_speed: iface.if_speed,
            if_phys_address: iface.if_phys_address.clone(),
            ip_addresses: iface.ip_addresses.clone(),
            if_admin_status: iface.if_admin_status,
            if_oper_status: iface.if_oper_status,
            metadata: HashMap::new(),
        });
    }
    stats.interfaces = rows.len();
    if !rows.is_empty() {
        telemetry.write_interfaces(&rows).await?;
    }

    let mut correlation_updates: Vec<DeviceUpdate> = Vec::new();
    for (device_ip, ifaces) in &by_device {
        let alternates = collect_alternate_ips(device_ip, ifaces);
        if alternates.is_empty() {
            continue;
        }
        let keys = [IdentityKey::new(IdentityKind::Ip, device_ip.clone())];
        let Some((record, _)) = resolver.resolve(&keys, None).await? else {
            debug!(ip = %device_ip, "no canonical device for interface group");
            continue;
        };
        let Some(canonical) = store.get_device(&record.canonical_device_id).await? else {
            continue;
        };

        let mut merged: BTreeSet<String> = canonical
            .metadata
            .get(update::ALTERNATE_IPS)
            .and_then(|v| serde_json::from_str::<Vec<String>>(v).ok())
            .unwrap_or_default()
            .into_iter()
            .collect();
        let before = merged.len();
        merged.extend(alternates);
        if merged.len() == before {
            continue;
        }

        let alternate_json = serde_json::to_string(&merged.iter().collect::<Vec<_>>())
            .unwrap_or_else(|_| "[]".to_string());
        let mut metadata = HashMap::new();
        metadata.insert(update::ALTERNATE_IPS.to_string(), alternate_json);
        stats.correlated += 1;
        // Identity fields stay unset: the canonical's hostname and MAC win.
        correlation_updates.push(DeviceUpdate {
            device_id: Some(canonical.device_id.clone()),
            partition: record.partition.clone(),
            ip: canonical.ip.clone(),
            source: DeviceSource::Snmp,
            timestamp: now,
            is_available: true,
            metadata,
            hostname: None,
            mac: None,
        });
    }
    if let (Some(registry), false) = (registry, correlation_updates.is_empty()) {
        registry.process_batch_device_updates(correlation_updates).await?;
    }

    // Topology.
    let mut topo_rows: Vec<TopologyEvent> = Vec::new();
    for link in &decoded.topology {
        let local_device_id = match (
            link.local_device_id.as_deref().filter(|s| !s.is_empty()),
            link.local_ip.as_deref().filter(|s| !s.is_empty()),
        ) {
            (Some(id), _) => id.to_string(),
            (None, Some(ip)) => device_id_for(&ctx.partition, ip),
            (None, None) => {
                debug!("skipping topology link with no local identity");
                continue;
            }
        };
        topo_rows.push(TopologyEvent {
            protocol: link.protocol.clone().unwrap_or_else(|| "lldp".to_string()),
            local_device_id,
            local_if_index: link.local_if_index,
            local_if_name: link.local_if_name.clone(),
            remote_chassis_id: link.remote_chassis_id.clone(),
            remote_port_id: link.remote_port_id.clone(),
            remote_system_name: link.remote_system_name.clone(),
            remote_device_ip: link.remote_ip.clone(),
            timestamp: now,
            agent_id: agent_id.clone(),
            poller_id: poller_id.clone(),
        });
    }
    stats.topology_events = topo_rows.len();
    if !topo_rows.is_empty() {
        telemetry.write_topology_events(&topo_rows).await?;
    }

    info!(
        devices = stats.devices,
        interfaces = stats.interfaces,
        correlated = stats.correlated,
        topology = stats.topology_events,
        "processed snmp discovery results"
    );
    Ok(stats)
}

/// Union of non-loopback, non-empty interface IPs for one device,
/// excluding the device's own primary IP. Duplicates collapse.
fn collect_alternate_ips(device_ip: &str, ifaces: &[&SnmpInterface]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for iface in ifaces {
        for ip in &iface.ip_addresses {
            let ip = ip.trim();
            if ip.is_empty() || ip == device_ip || is_loopback(ip) {
                continue;
            }
            out.insert(ip.to_string());
        }
    }
    out
}

fn is_loopback(ip: &str) -> bool {
    ip == "::1" || ip.starts_with("127.")
}
