use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("bus connect failed: {0}")]
    Connect(String),

    #[error("stream setup failed: {0}")]
    Stream(String),

    /// Non-transient publish failure (bad subject, stream config).
    /// Connection-class failures never surface here; they schedule a
    /// background reinit instead.
    #[error("publish failed: {0}")]
    Publish(String),

    #[error("event encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}
