use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use tracing::debug;

use crate::error::ConfigError;
use crate::raw::RawCoreConfig;

// ── Typed config ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub ingest: IngestConfig,
    pub reaper: ReaperConfig,
    pub backfill: BackfillConfig,
    pub bus: BusConfig,
    /// Namespace prefix for the identity KV mirror.
    pub kv_namespace: String,
    pub onboarding: OnboardingConfig,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub flush_interval: Duration,
    /// Max device updates per registry batch when processing sync payloads.
    pub sync_chunk: usize,
}

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub interval: Duration,
    pub sighting_ttl: chrono::Duration,
    pub stale_device_ttl: chrono::Duration,
}

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Tombstones per published chunk.
    pub chunk_size: usize,
    /// Device ids per existence-check statement.
    pub lookup_chunk: usize,
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub url: String,
    pub stream: String,
    pub subjects: Vec<String>,
    pub domain: Option<String>,
    pub credentials_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct OnboardingConfig {
    /// 32-byte AES-256-GCM key for join-token and bundle ciphertexts.
    pub encryption_key: Vec<u8>,
    pub join_token_ttl: chrono::Duration,
    pub download_token_ttl: chrono::Duration,
    /// Parent entry id under which downstream join-token entries are minted.
    pub join_token_parent: String,
    pub trust_domain: String,
    /// Optional prefix applied to every poller slug.
    pub poller_prefix: Option<String>,
    pub allowed_refresh_interval: Duration,
    pub allowed_refresh_timeout: Duration,
    pub activation_cache_ttl: chrono::Duration,
    pub mtls: MtlsConfig,
}

#[derive(Debug, Clone)]
pub struct MtlsConfig {
    /// Base directory holding the CA cert and key. Paths derived from it
    /// are sanitized against traversal.
    pub cert_dir: PathBuf,
    pub server_name: String,
    pub endpoints: Vec<String>,
    pub cert_ttl_days: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            ingest: IngestConfig {
                flush_interval: Duration::from_secs(10),
                sync_chunk: 1024,
            },
            reaper: ReaperConfig {
                interval: Duration::from_secs(300),
                sighting_ttl: chrono::Duration::hours(24),
                stale_device_ttl: chrono::Duration::days(7),
            },
            backfill: BackfillConfig {
                chunk_size: 500,
                lookup_chunk: 1000,
            },
            bus: BusConfig {
                url: "nats://127.0.0.1:4222".to_string(),
                stream: "events".to_string(),
                subjects: vec!["events.>".to_string()],
                domain: None,
                credentials_path: None,
            },
            kv_namespace: "default".to_string(),
            onboarding: OnboardingConfig {
                encryption_key: vec![0; 32],
                join_token_ttl: chrono::Duration::minutes(60),
                download_token_ttl: chrono::Duration::hours(24),
                join_token_parent: "serviceradar/join".to_string(),
                trust_domain: "serviceradar".to_string(),
                poller_prefix: None,
                allowed_refresh_interval: Duration::from_secs(30),
                allowed_refresh_timeout: Duration::from_secs(5),
                activation_cache_ttl: chrono::Duration::seconds(30),
                mtls: MtlsConfig {
                    cert_dir: PathBuf::from("/etc/serviceradar/certs"),
                    server_name: "core.serviceradar".to_string(),
                    endpoints: vec![],
                    cert_ttl_days: 30,
                },
            },
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load the core config from a YAML file. Absent fields fall back to
/// defaults; the encryption key is validated here so a bad deployment
/// fails at startup, not at the first deliver.
pub fn load_config(path: &Path) -> Result<CoreConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let raw: RawCoreConfig =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
            path: path.display().to_string(),
            source: e,
        })?;
    debug!("Loaded core config from {}", path.display());
    convert(raw, path)
}

fn convert(raw: RawCoreConfig, path: &Path) -> Result<CoreConfig, ConfigError> {
    let mut cfg = CoreConfig::default();
    let path_str = path.display().to_string();

    if let Some(v) = raw.ingest.flush_interval_secs {
        cfg.ingest.flush_interval = Duration::from_secs(v);
    }
    if let Some(v) = raw.ingest.sync_chunk {
        if v == 0 {
            return Err(ConfigError::Invalid {
                path: path_str,
                message: "ingest.sync_chunk must be > 0".into(),
            });
        }
        cfg.ingest.sync_chunk = v;
    }

    if let Some(v) = raw.reaper.interval_secs {
        cfg.reaper.interval = Duration::from_secs(v);
    }
    if let Some(v) = raw.reaper.sighting_ttl_secs {
        cfg.reaper.sighting_ttl = chrono::Duration::seconds(v);
    }
    if let Some(v) = raw.reaper.stale_device_ttl_secs {
        cfg.reaper.stale_device_ttl = chrono::Duration::seconds(v);
    }

    if let Some(v) = raw.backfill.chunk_size {
        cfg.backfill.chunk_size = v.clamp(1, 1000);
    }
    if let Some(v) = raw.backfill.lookup_chunk {
        cfg.backfill.lookup_chunk = v.clamp(1, 1000);
    }

    if let Some(v) = raw.bus.url {
        cfg.bus.url = v;
    }
    if let Some(v) = raw.bus.stream {
        cfg.bus.stream = v;
    }
    if !raw.bus.subjects.is_empty() {
        cfg.bus.subjects = raw.bus.subjects;
    }
    cfg.bus.domain = raw.bus.domain;
    cfg.bus.credentials_path = raw.bus.credentials_path.map(PathBuf::from);

    if let Some(v) = raw.kv_namespace {
        cfg.kv_namespace = v;
    }

    let ob = raw.onboarding;
    if let Some(key_b64) = ob.encryption_key {
        let key = base64::engine::general_purpose::STANDARD
            .decode(key_b64.trim())
            .map_err(|e| ConfigError::Invalid {
                path: path_str.clone(),
                message: format!("onboarding.encryption_key is not valid base64: {}", e),
            })?;
        if key.len() != 32 {
            return Err(ConfigError::Invalid {
                path: path_str,
                message: format!(
                    "onboarding.encryption_key must decode to 32 bytes, got {}",
                    key.len()
                ),
            });
        }
        cfg.onboarding.encryption_key = key;
    }
    if let Some(v) = ob.join_token_ttl_secs {
        cfg.onboarding.join_token_ttl = chrono::Duration::seconds(v);
    }
    if let Some(v) = ob.download_token_ttl_secs {
        cfg.onboarding.download_token_ttl = chrono::Duration::seconds(v);
    }
    if let Some(v) = ob.join_token_parent {
        cfg.onboarding.join_token_parent = v;
    }
    if let Some(v) = ob.trust_domain {
        cfg.onboarding.trust_domain = v;
    }
    cfg.onboarding.poller_prefix = ob.poller_prefix;
    if let Some(v) = ob.allowed_refresh_interval_secs {
        cfg.onboarding.allowed_refresh_interval = Duration::from_secs(v);
    }
    if let Some(v) = ob.allowed_refresh_timeout_secs {
        cfg.onboarding.allowed_refresh_timeout = Duration::from_secs(v);
    }
    if let Some(v) = ob.activation_cache_ttl_secs {
        cfg.onboarding.activation_cache_ttl = chrono::Duration::seconds(v);
    }

    if let Some(v) = ob.mtls.cert_dir {
        cfg.onboarding.mtls.cert_dir = PathBuf::from(v);
    }
    if let Some(v) = ob.mtls.server_name {
        cfg.onboarding.mtls.server_name = v;
    }
    if !ob.mtls.endpoints.is_empty() {
        cfg.onboarding.mtls.endpoints = ob.mtls.endpoints;
    }
    if let Some(v) = ob.mtls.cert_ttl_days {
        cfg.onboarding.mtls.cert_ttl_days = v;
    }

    Ok(cfg)
}
