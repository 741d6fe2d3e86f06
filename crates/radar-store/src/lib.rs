pub mod device;
pub mod error;
pub mod kv;
pub mod memory;
pub mod onboarding;
pub mod rows;
pub mod telemetry;

pub use device::DeviceStore;
pub use error::{KvError, StoreError};
pub use kv::{KvEntry, KvStore};
pub use memory::{InMemoryKv, InMemoryStore};
pub use onboarding::{OnboardingStore, PackageFilter};
pub use rows::{
    CpuMetric, DiscoveredInterface, DiskMetric, MemoryMetric, ServiceRecord, ServiceStatus,
    SightingEvent, SysmonBatch, SysmonMetrics, SysmonRow, TimeseriesMetric, TopologyEvent,
};
pub use telemetry::TelemetryStore;
