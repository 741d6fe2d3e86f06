pub mod buffer;
pub mod classify;
pub mod discovery;
pub mod error;

pub use buffer::{spawn_flush_loop, BufferCounts, IngestBuffers};
pub use classify::classify_device_type;
pub use discovery::{
    process_snmp_discovery_results, process_sync_results, DeviceRegistry, ServiceContext,
    SnmpStats, StoreRegistry, SyncStats,
};
pub use error::IngestError;
