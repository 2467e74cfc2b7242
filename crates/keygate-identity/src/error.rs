use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("STS error: {0}")]
    Sts(String),

    #[error("identity response missing {0}")]
    MissingField(&'static str),

    #[error("bad expiration timestamp: {0}")]
    BadExpiration(String),
}
