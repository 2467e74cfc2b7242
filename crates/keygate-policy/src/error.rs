use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy parameter not found: {parameter} (verify the SSM parameter exists and you have ssm:GetParameter)")]
    NotFound { parameter: String },

    #[error("policy parse error: {0}")]
    Parse(String),

    #[error("policy signature rejected: {0}")]
    Signature(String),

    #[error("SSM transport error: {0}")]
    Transport(String),

    #[error("KMS error: {0}")]
    Kms(String),
}

impl From<serde_yaml::Error> for PolicyError {
    fn from(e: serde_yaml::Error) -> Self {
        PolicyError::Parse(e.to_string())
    }
}
