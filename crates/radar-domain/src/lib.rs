pub mod error;
pub mod identity;
pub mod onboarding;
pub mod partition;
pub mod sighting;
pub mod types;
pub mod update;

#[cfg(test)]
mod tests;

pub use error::DomainError;
pub use identity::{
    metadata_hash, normalize_identity_keys, CanonicalAttrs, CanonicalRecord, IdentityKey,
    IdentityKind,
};
pub use onboarding::{
    ComponentType, OnboardingEvent, OnboardingEventType, OnboardingPackage, PackageStatus,
    SecurityMode,
};
pub use partition::{device_id_for, partition_of, quote_literal, sanitize_slug};
pub use sighting::Sighting;
pub use types::{CanonicalDevice, DeviceId, DeviceSource, PollerId};
pub use update::{DeviceUpdate, LifecycleEvent};
