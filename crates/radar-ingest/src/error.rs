use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("payload parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Store(#[from] radar_store::StoreError),

    #[error(transparent)]
    Resolve(#[from] radar_identity::ResolveError),
}
