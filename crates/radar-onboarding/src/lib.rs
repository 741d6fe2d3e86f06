pub mod allowed;
pub mod cache;
pub mod crypto;
pub mod error;
pub mod kv_project;
pub mod mtls;
pub mod service;
pub mod spire;

pub use allowed::{spawn_allowed_refresh, AllowedPollers};
pub use cache::{ActivationCache, CacheLookup, CacheStats};
pub use crypto::{generate_download_token, hash_download_token, verify_download_token, BundleCipher};
pub use error::OnboardingError;
pub use mtls::{MtlsBundle, MtlsMinter};
pub use service::{
    ActivationRequest, CreatePackageRequest, CreatedPackage, DeliveredPackage, OnboardingService,
};
pub use spire::{DownstreamEntryRequest, LocalTrustDomain, TrustDomainClient};
