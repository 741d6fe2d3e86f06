use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error(transparent)]
    Store(#[from] radar_store::StoreError),

    #[error(transparent)]
    Kv(#[from] radar_store::KvError),
}
