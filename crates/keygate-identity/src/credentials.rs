use aws_sdk_sts::Client;
use jiff::Timestamp;
use tracing::info;

use crate::error::IdentityError;

/// An issued temporary credential set.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expiration: Option<Timestamp>,
}

/// What the broker asks the issuer for.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub role_arn: String,
    pub session_name: String,
    /// Stamped into cloud-side audit trails via sts:SourceIdentity.
    pub source_identity: String,
    pub duration_secs: i64,
    /// Correlates the issuance with the session row and audit entry.
    pub request_id: String,
}

pub trait CredentialIssuer: Send + Sync {
    fn issue(
        &self,
        request: &IssueRequest,
    ) -> impl std::future::Future<Output = Result<Credentials, IdentityError>> + Send;
}

#[derive(Clone)]
pub struct StsCredentialIssuer {
    client: Client,
}

impl StsCredentialIssuer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl CredentialIssuer for StsCredentialIssuer {
    async fn issue(&self, request: &IssueRequest) -> Result<Credentials, IdentityError> {
        info!(
            role_arn = %request.role_arn,
            session = %request.session_name,
            source_identity = %request.source_identity,
            request_id = %request.request_id,
            "assuming role"
        );

        let resp = self
            .client
            .assume_role()
            .role_arn(&request.role_arn)
            .role_session_name(&request.session_name)
            .source_identity(&request.source_identity)
            .duration_seconds(request.duration_secs as i32)
            .send()
            .await
            .map_err(|e| IdentityError::Sts(e.into_service_error().to_string()))?;

        let creds = resp
            .credentials()
            .ok_or(IdentityError::MissingField("credentials"))?;

        let expiration = Timestamp::from_second(creds.expiration().secs())
            .map_err(|e| IdentityError::BadExpiration(e.to_string()))?;

        Ok(Credentials {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: Some(creds.session_token().to_string()),
            expiration: Some(expiration),
        })
    }
}
