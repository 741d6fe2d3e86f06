use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::OnboardingError;

/// A downstream registration bound to a join token.
#[derive(Debug, Clone)]
pub struct DownstreamEntryRequest {
    /// Parent entry the join-token registration hangs under.
    pub parent_id: String,
    pub spiffe_id: String,
    pub selectors: Vec<String>,
    pub x509_ttl: chrono::Duration,
    pub jwt_ttl: chrono::Duration,
}

/// Admin interface to the trust domain. Production wires this to the
/// SPIRE server's admin API; tests and local serve use [`LocalTrustDomain`].
#[async_trait]
pub trait TrustDomainClient: Send + Sync + 'static {
    async fn mint_join_token(&self, ttl: chrono::Duration) -> Result<String, OnboardingError>;

    /// Returns the created entry id.
    async fn create_downstream_entry(
        &self,
        req: &DownstreamEntryRequest,
    ) -> Result<String, OnboardingError>;

    async fn delete_downstream_entry(&self, entry_id: &str) -> Result<(), OnboardingError>;

    /// The trust bundle in PEM form.
    async fn fetch_trust_bundle(&self) -> Result<Vec<u8>, OnboardingError>;
}

/// In-memory trust domain for tests and local runs. Join tokens and entry
/// ids are opaque UUIDs, the bundle is a fixed marker document.
#[derive(Default)]
pub struct LocalTrustDomain {
    entries: Arc<Mutex<HashMap<String, DownstreamEntryRequest>>>,
    /// When set, entry creation fails (exercises the compensation path).
    pub fail_entry_creation: bool,
    /// When set, bundle fetches fail after entry creation succeeded.
    pub fail_bundle_fetch: bool,
}

impl LocalTrustDomain {
    pub fn new() -> Self {
        Self::default()
    }

    /// A trust domain whose bundle fetches fail after entry creation
    /// succeeds, to exercise compensating entry deletion.
    pub fn failing_bundle_fetch() -> Self {
        LocalTrustDomain { fail_bundle_fetch: true, ..Self::default() }
    }

    pub async fn entry_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn has_entry(&self, entry_id: &str) -> bool {
        self.entries.lock().await.contains_key(entry_id)
    }
}

#[async_trait]
impl TrustDomainClient for LocalTrustDomain {
    async fn mint_join_token(&self, _ttl: chrono::Duration) -> Result<String, OnboardingError> {
        Ok(Uuid::new_v4().to_string())
    }

    async fn create_downstream_entry(
        &self,
        req: &DownstreamEntryRequest,
    ) -> Result<String, OnboardingError> {
        if self.fail_entry_creation {
            return Err(OnboardingError::SpireUnavailable(
                "entry creation disabled".to_string(),
            ));
        }
        let entry_id = Uuid::new_v4().to_string();
        self.entries.lock().await.insert(entry_id.clone(), req.clone());
        Ok(entry_id)
    }

    async fn delete_downstream_entry(&self, entry_id: &str) -> Result<(), OnboardingError> {
        self.entries.lock().await.remove(entry_id);
        Ok(())
    }

    async fn fetch_trust_bundle(&self) -> Result<Vec<u8>, OnboardingError> {
        if self.fail_bundle_fetch {
            return Err(OnboardingError::SpireUnavailable(
                "bundle fetch disabled".to_string(),
            ));
        }
        Ok(b"-----BEGIN CERTIFICATE-----\nlocal-trust-bundle\n-----END CERTIFICATE-----\n".to_vec())
    }
}
