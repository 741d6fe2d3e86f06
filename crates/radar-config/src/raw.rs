use serde::{Deserialize, Serialize};

/// Raw YAML representation of the core config file (core.yml).
/// All intervals and TTLs are seconds.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawCoreConfig {
    #[serde(default)]
    pub ingest: RawIngest,
    #[serde(default)]
    pub reaper: RawReaper,
    #[serde(default)]
    pub backfill: RawBackfill,
    #[serde(default)]
    pub bus: RawBus,
    #[serde(default)]
    pub kv_namespace: Option<String>,
    #[serde(default)]
    pub onboarding: RawOnboarding,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawIngest {
    pub flush_interval_secs: Option<u64>,
    pub sync_chunk: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawReaper {
    pub interval_secs: Option<u64>,
    pub sighting_ttl_secs: Option<i64>,
    pub stale_device_ttl_secs: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawBackfill {
    pub chunk_size: Option<usize>,
    pub lookup_chunk: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawBus {
    pub url: Option<String>,
    pub stream: Option<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    pub domain: Option<String>,
    pub credentials_path: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawOnboarding {
    /// Base64 of the 32-byte bundle encryption key.
    pub encryption_key: Option<String>,
    pub join_token_ttl_secs: Option<i64>,
    pub download_token_ttl_secs: Option<i64>,
    pub join_token_parent: Option<String>,
    pub trust_domain: Option<String>,
    pub poller_prefix: Option<String>,
    pub allowed_refresh_interval_secs: Option<u64>,
    pub allowed_refresh_timeout_secs: Option<u64>,
    pub activation_cache_ttl_secs: Option<i64>,
    #[serde(default)]
    pub mtls: RawMtls,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawMtls {
    pub cert_dir: Option<String>,
    pub server_name: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<String>,
    pub cert_ttl_days: Option<u32>,
}
