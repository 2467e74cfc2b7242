//! KMS-backed detached signatures over policy documents.
//!
//! The artifact pairs a base64 signature with the metadata needed to
//! verify it later. `verify` recomputes the policy hash and rejects a
//! mismatch locally, so hash tampering is detectable without a KMS
//! round-trip.

use aws_sdk_kms::Client;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::{MessageType, SigningAlgorithmSpec};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::PolicyError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureMetadata {
    pub key_id: String,
    pub algorithm: String,
    pub signed_at: Timestamp,
    /// Hex SHA-256 of the signed policy bytes.
    pub policy_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureArtifact {
    /// Base64 of the raw KMS signature.
    pub signature: String,
    pub metadata: SignatureMetadata,
}

pub fn policy_hash(policy_bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(policy_bytes))
}

/// Facade over KMS Sign/Verify for one signing key.
#[derive(Clone)]
pub struct PolicySigner {
    client: Client,
    key_id: String,
    algorithm: SigningAlgorithmSpec,
}

impl PolicySigner {
    pub fn new(client: Client, key_id: impl Into<String>) -> Self {
        Self {
            client,
            key_id: key_id.into(),
            algorithm: SigningAlgorithmSpec::RsassaPssSha256,
        }
    }

    pub fn with_algorithm(mut self, algorithm: SigningAlgorithmSpec) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Sign a policy document, producing the artifact operators store
    /// alongside the policy parameter.
    pub async fn sign(
        &self,
        policy_bytes: &[u8],
        now: Timestamp,
    ) -> Result<SignatureArtifact, PolicyError> {
        let digest = Sha256::digest(policy_bytes);

        let resp = self
            .client
            .sign()
            .key_id(&self.key_id)
            .message(Blob::new(digest.to_vec()))
            .message_type(MessageType::Digest)
            .signing_algorithm(self.algorithm.clone())
            .send()
            .await
            .map_err(|e| PolicyError::Kms(e.into_service_error().to_string()))?;

        let signature = resp
            .signature()
            .ok_or_else(|| PolicyError::Kms("KMS Sign returned no signature".to_string()))?;

        info!(key_id = %self.key_id, "policy signed");

        Ok(SignatureArtifact {
            signature: BASE64.encode(signature.as_ref()),
            metadata: SignatureMetadata {
                key_id: self.key_id.clone(),
                algorithm: self.algorithm.as_str().to_string(),
                signed_at: now,
                policy_hash: policy_hash(policy_bytes),
            },
        })
    }

    /// Verify an artifact against policy bytes. `Ok(false)` means the
    /// signature (or the recorded hash) does not match; errors are
    /// transport-level only.
    pub async fn verify(
        &self,
        policy_bytes: &[u8],
        artifact: &SignatureArtifact,
    ) -> Result<bool, PolicyError> {
        // Hash precheck: tampered bytes are rejected without a KMS call.
        if artifact.metadata.policy_hash != policy_hash(policy_bytes) {
            warn!(key_id = %self.key_id, "policy hash mismatch, rejecting before KMS");
            return Ok(false);
        }

        let signature = BASE64
            .decode(&artifact.signature)
            .map_err(|e| PolicyError::Signature(format!("signature is not valid base64: {e}")))?;
        let digest = Sha256::digest(policy_bytes);

        let resp = self
            .client
            .verify()
            .key_id(&self.key_id)
            .message(Blob::new(digest.to_vec()))
            .message_type(MessageType::Digest)
            .signing_algorithm(self.algorithm.clone())
            .signature(Blob::new(signature))
            .send()
            .await;

        match resp {
            Ok(out) => Ok(out.signature_valid()),
            Err(e) => {
                let err = e.into_service_error();
                if err.is_kms_invalid_signature_exception() {
                    Ok(false)
                } else {
                    Err(PolicyError::Kms(err.to_string()))
                }
            }
        }
    }
}
