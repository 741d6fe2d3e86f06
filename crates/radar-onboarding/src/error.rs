use thiserror::Error;

/// Error kinds of the onboarding surface. Callers distinguish transient
/// from permanent failures by variant, never by string matching.
#[derive(Debug, Error)]
pub enum OnboardingError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Component id already in use; the caller can retry with another.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Storage(#[from] radar_store::StoreError),

    #[error(transparent)]
    Kv(#[from] radar_store::KvError),

    /// Bundle ciphertext corrupt or key mismatch. Always surfaced.
    #[error("bundle decrypt failed")]
    DecryptFailed,

    /// Trust-domain admin required for non-mTLS packages.
    #[error("trust domain unavailable: {0}")]
    SpireUnavailable(String),

    /// A configured CA path escapes its base directory. Fatal to the request.
    #[error("path escapes certificate directory: {0}")]
    PathTraversal(String),

    #[error("download token invalid")]
    DownloadInvalid,

    /// The one-shot download token was already consumed.
    #[error("package already delivered")]
    PackageDelivered,

    #[error("package not deletable: {0}")]
    NotDeletable(String),

    #[error("unsupported component type: {0}")]
    UnsupportedComponentType(String),

    #[error("certificate minting failed: {0}")]
    CertMint(String),

    #[error(transparent)]
    Domain(#[from] radar_domain::DomainError),
}
