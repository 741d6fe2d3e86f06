use std::sync::Arc;

use radar_events::EventPublisher;
use radar_identity::CanonicalResolver;
use radar_ingest::IngestBuffers;
use radar_onboarding::OnboardingService;
use radar_store::{DeviceStore, KvStore, TelemetryStore};

#[derive(Clone)]
pub struct AppState {
    pub devices: Arc<dyn DeviceStore>,
    pub telemetry: Arc<dyn TelemetryStore>,
    pub kv: Arc<dyn KvStore>,
    pub resolver: Arc<CanonicalResolver>,
    pub onboarding: Arc<OnboardingService>,
    pub buffers: Arc<IngestBuffers>,
    /// Absent when the bus is disabled (tests, degraded serve).
    pub publisher: Option<Arc<EventPublisher>>,
    pub auth_token: Arc<String>,
    /// Namespace for the identity KV mirror primed by backfill.
    pub kv_namespace: String,
    /// Chunk size for sync-result batches.
    pub sync_chunk: usize,
}
