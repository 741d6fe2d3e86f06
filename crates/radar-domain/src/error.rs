use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("invalid component type: {0}")]
    InvalidComponentType(String),

    #[error("invalid security mode: {0}")]
    InvalidSecurityMode(String),

    #[error("invalid package status: {0}")]
    InvalidPackageStatus(String),

    #[error("label yields an empty slug: {0}")]
    InvalidLabel(String),
}
