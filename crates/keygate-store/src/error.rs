use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {id}")]
    NotFound { id: String },

    #[error("row already exists: {id}")]
    AlreadyExists { id: String },

    #[error("concurrent modification of {id}: the row changed since it was read")]
    ConcurrentModification { id: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("malformed row: {0}")]
    MalformedRow(String),

    #[error("DynamoDB error: {0}")]
    Transport(String),
}
