use async_trait::async_trait;
use radar_domain::{ComponentType, OnboardingEvent, OnboardingPackage, PackageStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Filter for `list_packages`. Empty fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageFilter {
    pub component_type: Option<ComponentType>,
    #[serde(default)]
    pub statuses: Vec<PackageStatus>,
    pub poller_id: Option<String>,
}

impl PackageFilter {
    pub fn matches(&self, pkg: &OnboardingPackage) -> bool {
        if let Some(t) = self.component_type {
            if pkg.component_type != t {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&pkg.status) {
            return false;
        }
        if let Some(p) = &self.poller_id {
            if pkg.poller_id.as_deref() != Some(p.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Interface to the onboarding package and event tables.
#[async_trait]
pub trait OnboardingStore: Send + Sync + 'static {
    async fn get_package(&self, id: Uuid) -> Result<Option<OnboardingPackage>, StoreError>;

    /// Most recent non-deleted package for a component identity.
    async fn find_package(
        &self,
        component_type: ComponentType,
        component_id: &str,
    ) -> Result<Option<OnboardingPackage>, StoreError>;

    async fn list_packages(
        &self,
        filter: &PackageFilter,
    ) -> Result<Vec<OnboardingPackage>, StoreError>;

    async fn upsert_package(&self, pkg: &OnboardingPackage) -> Result<(), StoreError>;

    /// Hard delete. Lifecycle policy (only revoked/expired) is enforced by
    /// the onboarding service, not here.
    async fn delete_package(&self, id: Uuid) -> Result<(), StoreError>;

    async fn append_event(&self, event: &OnboardingEvent) -> Result<(), StoreError>;

    async fn list_events(
        &self,
        package_id: Uuid,
        limit: u32,
    ) -> Result<Vec<OnboardingEvent>, StoreError>;

    /// Poller ids whose packages currently admit ingress (not revoked,
    /// expired, or deleted).
    async fn list_allowed_pollers(&self) -> Result<Vec<String>, StoreError>;

    /// Whether a component id is already taken within a component type.
    async fn component_id_in_use(
        &self,
        component_type: ComponentType,
        component_id: &str,
    ) -> Result<bool, StoreError>;
}
