use async_trait::async_trait;

use crate::error::KvError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub value: Vec<u8>,
    pub revision: u64,
}

/// Interface to the configuration KV store. Revisions are per-key and
/// monotonically increasing; `update` is compare-and-swap on revision.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, KvError>;

    /// Unconditional write. Returns the new revision.
    async fn put(&self, key: &str, value: &[u8]) -> Result<u64, KvError>;

    /// Create-only write; `KvError::AlreadyExists` when the key is present.
    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<u64, KvError>;

    /// Write at a witnessed revision; `KvError::Aborted` when another
    /// writer has moved the key since.
    async fn update(&self, key: &str, value: &[u8], revision: u64) -> Result<u64, KvError>;

    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Keys under a prefix, lexicographic. Used for template discovery.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, KvError>;
}
