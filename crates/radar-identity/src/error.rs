use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// No identity keys and no IP hint: there is nothing to resolve.
    #[error("no identity keys or ip hint supplied")]
    InvalidRequest,

    /// The resolver was constructed without a storage handle.
    #[error("storage handle is absent")]
    StorageUnavailable,

    #[error("unsupported identity kind: {0}")]
    UnsupportedKind(String),

    #[error(transparent)]
    Store(#[from] radar_store::StoreError),
}
