//! The local profile registry: named pointers to the cloud-access
//! parameters credentials may be issued for.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub role_arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_duration_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileRegistry {
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl ProfileRegistry {
    pub fn from_yaml(raw: &str) -> Result<Self, BrokerError> {
        serde_yaml::from_str(raw).map_err(|e| {
            BrokerError::Validation(format!("malformed profile registry: {e}"))
        })
    }

    /// Lookup used by the broker's fail-fast profile check.
    pub fn get(&self, name: &str) -> Result<&Profile, BrokerError> {
        self.profiles
            .get(name)
            .ok_or_else(|| BrokerError::UnknownProfile(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, profile: Profile) {
        self.profiles.insert(name.into(), profile);
    }
}
