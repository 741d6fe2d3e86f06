use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("package not found: {0}")]
    PackageNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transient engine failure; background loops retry, RPCs surface it.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("internal store error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum KvError {
    /// `put_if_absent` lost to an existing key.
    #[error("key already exists: {0}")]
    AlreadyExists(String),

    /// Revision mismatch on `update`: another writer won the race.
    #[error("update aborted for {0}: revision mismatch")]
    Aborted(String),

    #[error("key not found: {0}")]
    NotFound(String),

    /// Backend doesn't support this operation; callers downgrade to no-op.
    #[error("operation not implemented by the kv backend")]
    Unimplemented,

    #[error("kv unavailable: {0}")]
    Unavailable(String),
}
