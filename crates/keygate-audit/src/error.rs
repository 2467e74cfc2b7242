use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit key too short: {len} bytes (minimum {min})")]
    KeyTooShort { len: usize, min: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audit log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit sink failure: {0}")]
    Sink(String),
}
