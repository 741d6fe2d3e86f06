use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Parameters for one backfill run.
#[derive(Debug, Clone, Default)]
pub struct BackfillRequest {
    /// Count what would be emitted; publish nothing.
    pub dry_run: bool,
    /// Compute the same mapping but only prime the identity KV mirror.
    pub seed_kv_only: bool,
    /// Tombstones per published batch. Clamped to 1..=1000.
    pub chunk_size: Option<usize>,
    /// Device ids per existence-check statement. Clamped to 1..=1000.
    pub lookup_chunk: Option<usize>,
    /// Publication is cancellable between chunks, never mid-chunk.
    pub shutdown: Option<watch::Receiver<bool>>,
}

impl BackfillRequest {
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(500).clamp(1, 1000)
    }

    pub fn lookup_chunk(&self) -> usize {
        self.lookup_chunk.unwrap_or(1000).clamp(1, 1000)
    }
}

/// Outcome of one backfill run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackfillReport {
    pub dry_run: bool,
    pub seed_kv_only: bool,
    /// Devices examined across both passes.
    pub scanned: usize,
    /// Strong-identity groups containing more than one live member.
    pub duplicate_groups: usize,
    pub tombstones_emitted: usize,
    pub tombstones_would_emit: usize,
    /// Of the emitted/would-emit total, how many came from IP aliasing.
    pub ip_alias_tombstones: usize,
    /// Identity KV mirror entries written.
    pub kv_seeded: usize,
    /// True when a shutdown signal stopped publication between chunks.
    pub cancelled: bool,
    pub errors: Vec<String>,
}
