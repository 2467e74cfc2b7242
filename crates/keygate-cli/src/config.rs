//! Deployment configuration: table names, the policy parameters, the
//! audit log location, and the profile registry, loaded from a YAML file
//! under the OS config dir.

use std::path::{Path, PathBuf};

use keygate_broker::ProfileRegistry;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeygateConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default = "default_policy_parameter")]
    pub policy_parameter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_policy_parameter: Option<String>,
    /// KMS key for policy signature verification. Absent = unverified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key_id: Option<String>,

    #[serde(default = "default_request_table")]
    pub request_table: String,
    #[serde(default = "default_breakglass_table")]
    pub breakglass_table: String,
    #[serde(default = "default_session_table")]
    pub session_table: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_log_path: Option<PathBuf>,
    /// File holding the raw HMAC key bytes. The KEYGATE_AUDIT_KEY
    /// environment variable takes precedence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_key_file: Option<PathBuf>,

    #[serde(flatten)]
    pub registry: ProfileRegistry,
}

fn default_policy_parameter() -> String {
    "/keygate/policy".to_string()
}

fn default_request_table() -> String {
    "keygate-requests".to_string()
}

fn default_breakglass_table() -> String {
    "keygate-breakglass".to_string()
}

fn default_session_table() -> String {
    "keygate-sessions".to_string()
}

pub fn config_dir() -> eyre::Result<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| eyre::eyre!("no config directory found"))?;
    Ok(base.join("keygate"))
}

pub fn default_config_path() -> eyre::Result<PathBuf> {
    Ok(config_dir()?.join("config.yaml"))
}

pub fn load_config(path: Option<&Path>) -> eyre::Result<KeygateConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };
    let contents = std::fs::read_to_string(&path).map_err(|e| {
        eyre::eyre!(
            "failed to read config at {}: {e} (create it or pass --config)",
            path.display()
        )
    })?;
    let config: KeygateConfig = serde_yaml::from_str(&contents)
        .map_err(|e| eyre::eyre!("malformed config at {}: {e}", path.display()))?;
    Ok(config)
}

/// Resolve the audit signing key: KEYGATE_AUDIT_KEY env var first (raw
/// bytes), then the configured key file.
pub fn load_audit_key(config: &KeygateConfig) -> eyre::Result<keygate_audit::HmacKey> {
    if let Ok(raw) = std::env::var("KEYGATE_AUDIT_KEY") {
        return Ok(keygate_audit::HmacKey::new(raw.into_bytes())?);
    }
    let path = config
        .audit_key_file
        .as_ref()
        .ok_or_else(|| eyre::eyre!("no audit key: set KEYGATE_AUDIT_KEY or audit_key_file"))?;
    let bytes = std::fs::read(path)
        .map_err(|e| eyre::eyre!("failed to read audit key at {}: {e}", path.display()))?;
    Ok(keygate_audit::HmacKey::new(bytes)?)
}

/// Default audit log location when the config does not pin one.
pub fn default_audit_log_path() -> eyre::Result<PathBuf> {
    Ok(config_dir()?.join("audit.log"))
}
