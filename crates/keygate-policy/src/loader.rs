//! SSM-backed loading of the two policy documents.

use aws_sdk_ssm::Client;
use tracing::debug;

use crate::approval::ApprovalPolicy;
use crate::document::Policy;
use crate::error::PolicyError;

/// Fetch a parameter's raw string value, with decryption.
pub async fn get_parameter(client: &Client, parameter: &str) -> Result<String, PolicyError> {
    debug!(parameter = parameter, "fetching policy parameter");

    let resp = client
        .get_parameter()
        .name(parameter)
        .with_decryption(true)
        .send()
        .await
        .map_err(|e| {
            let err = e.into_service_error();
            if err.is_parameter_not_found() {
                PolicyError::NotFound {
                    parameter: parameter.to_string(),
                }
            } else {
                PolicyError::Transport(err.to_string())
            }
        })?;

    let value = resp
        .parameter()
        .and_then(|p| p.value())
        .ok_or_else(|| PolicyError::NotFound {
            parameter: parameter.to_string(),
        })?;

    Ok(value.to_string())
}

pub fn parse_policy(raw: &str) -> Result<Policy, PolicyError> {
    Ok(serde_yaml::from_str(raw)?)
}

pub fn parse_approval_policy(raw: &str) -> Result<ApprovalPolicy, PolicyError> {
    Ok(serde_yaml::from_str(raw)?)
}

/// Load and parse the access policy from a parameter.
pub async fn load_policy(client: &Client, parameter: &str) -> Result<Policy, PolicyError> {
    let raw = get_parameter(client, parameter).await?;
    parse_policy(&raw)
}

/// Load and parse the approval policy from a parameter.
pub async fn load_approval_policy(
    client: &Client,
    parameter: &str,
) -> Result<ApprovalPolicy, PolicyError> {
    let raw = get_parameter(client, parameter).await?;
    parse_approval_policy(&raw)
}
