//! The credential-process output contract.
//!
//! External tooling (the AWS CLI and SDKs via `credential_process`) reads
//! this JSON from stdout. Field names and casing are fixed by that
//! contract; `SessionToken` is omitted for credentials that cannot carry
//! one and `Expiration` for credentials that cannot expire.

use serde::{Deserialize, Serialize};

use crate::credentials::Credentials;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialProcessOutput {
    #[serde(rename = "Version")]
    pub version: u32,
    #[serde(rename = "AccessKeyId")]
    pub access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    pub secret_access_key: String,
    #[serde(rename = "SessionToken", skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(rename = "Expiration", skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
}

impl From<&Credentials> for CredentialProcessOutput {
    fn from(creds: &Credentials) -> Self {
        CredentialProcessOutput {
            version: 1,
            access_key_id: creds.access_key_id.clone(),
            secret_access_key: creds.secret_access_key.clone(),
            session_token: creds.session_token.clone(),
            expiration: creds.expiration.map(|t| t.to_string()),
        }
    }
}
