use aws_sdk_sts::Client;
use tracing::debug;

use crate::error::IdentityError;

/// The resolved caller, with the stable principal name stamped on every
/// request and audit entry.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub arn: String,
    pub account_id: String,
    pub user_id: String,
    /// Last path component of the ARN: the IAM user name or the assumed
    /// role's session name.
    pub principal_name: String,
}

pub trait IdentityResolver: Send + Sync {
    fn resolve(
        &self,
    ) -> impl std::future::Future<Output = Result<CallerIdentity, IdentityError>> + Send;
}

#[derive(Clone)]
pub struct StsIdentityResolver {
    client: Client,
}

impl StsIdentityResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl IdentityResolver for StsIdentityResolver {
    async fn resolve(&self) -> Result<CallerIdentity, IdentityError> {
        let resp = self
            .client
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| IdentityError::Sts(e.into_service_error().to_string()))?;

        let arn = resp
            .arn()
            .ok_or(IdentityError::MissingField("arn"))?
            .to_string();
        let account_id = resp
            .account()
            .ok_or(IdentityError::MissingField("account"))?
            .to_string();
        let user_id = resp
            .user_id()
            .ok_or(IdentityError::MissingField("user_id"))?
            .to_string();
        let principal_name = principal_from_arn(&arn);

        debug!(arn = %arn, principal = %principal_name, "caller identity resolved");

        Ok(CallerIdentity {
            arn,
            account_id,
            user_id,
            principal_name,
        })
    }
}

/// `arn:aws:iam::123:user/alice` -> `alice`;
/// `arn:aws:sts::123:assumed-role/Admin/alice` -> `alice`.
pub fn principal_from_arn(arn: &str) -> String {
    arn.rsplit('/').next().unwrap_or(arn).to_string()
}
