//! Single-flight caching around policy loads.
//!
//! The cache is process-wide with one entry per parameter name. Entries
//! expire after five minutes. The outer map lock is only held long enough
//! to find the per-key slot; the slot's own lock is what serializes
//! concurrent loaders, so at most one SSM fetch happens per key per
//! refresh window and no lock is held across the fetch by anyone else.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aws_sdk_ssm::Client;
use tokio::sync::Mutex;
use tracing::debug;

use crate::document::Policy;
use crate::error::PolicyError;
use crate::loader;
use crate::signing::{PolicySigner, SignatureArtifact};

/// How long a cached policy stays fresh.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Fetches a policy document from wherever it lives; the cache is
/// generic over this seam.
pub trait PolicyFetcher: Send + Sync {
    fn fetch(
        &self,
        parameter: &str,
    ) -> impl std::future::Future<Output = Result<Policy, PolicyError>> + Send;
}

/// The production fetcher: SSM GetParameter, optionally verifying a
/// detached KMS signature stored at `<parameter>.sig` before trusting
/// the document.
pub struct SsmPolicyFetcher {
    client: Client,
    signer: Option<PolicySigner>,
}

impl SsmPolicyFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            signer: None,
        }
    }

    pub fn with_signer(mut self, signer: PolicySigner) -> Self {
        self.signer = Some(signer);
        self
    }
}

impl PolicyFetcher for SsmPolicyFetcher {
    async fn fetch(&self, parameter: &str) -> Result<Policy, PolicyError> {
        let raw = loader::get_parameter(&self.client, parameter).await?;

        if let Some(signer) = &self.signer {
            let artifact_raw =
                loader::get_parameter(&self.client, &format!("{parameter}.sig")).await?;
            let artifact: SignatureArtifact = serde_json::from_str(&artifact_raw)
                .map_err(|e| PolicyError::Signature(format!("malformed signature artifact: {e}")))?;
            if !signer.verify(raw.as_bytes(), &artifact).await? {
                return Err(PolicyError::Signature(format!(
                    "signature verification failed for {parameter}"
                )));
            }
        }

        loader::parse_policy(&raw)
    }
}

struct Slot {
    policy: Option<Arc<Policy>>,
    fetched_at: Option<Instant>,
}

/// A keyed, single-flight policy cache over any [`PolicyFetcher`].
pub struct PolicyCache<F> {
    fetcher: F,
    ttl: Duration,
    slots: Mutex<HashMap<String, Arc<Mutex<Slot>>>>,
}

/// The cache the broker actually uses.
pub type CachedPolicyLoader = PolicyCache<SsmPolicyFetcher>;

impl<F: PolicyFetcher> PolicyCache<F> {
    pub fn new(fetcher: F) -> Self {
        Self::with_ttl(fetcher, DEFAULT_TTL)
    }

    pub fn with_ttl(fetcher: F, ttl: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Load the policy at `parameter`, fetching at most once per key per
    /// refresh window.
    pub async fn load(&self, parameter: &str) -> Result<Arc<Policy>, PolicyError> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots
                .entry(parameter.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(Slot {
                        policy: None,
                        fetched_at: None,
                    }))
                })
                .clone()
        };

        // Concurrent loaders for the same key queue here; whoever fetched
        // first leaves a fresh entry for the rest.
        let mut slot = slot.lock().await;
        if let (Some(policy), Some(fetched_at)) = (&slot.policy, slot.fetched_at)
            && fetched_at.elapsed() < self.ttl
        {
            debug!(parameter = parameter, "policy cache hit");
            return Ok(policy.clone());
        }

        let policy = Arc::new(self.fetcher.fetch(parameter).await?);
        slot.policy = Some(policy.clone());
        slot.fetched_at = Some(Instant::now());
        debug!(parameter = parameter, "policy cache refreshed");
        Ok(policy)
    }

    /// Drop the cached entry for one parameter.
    pub async fn invalidate(&self, parameter: &str) {
        self.slots.lock().await.remove(parameter);
    }
}

impl CachedPolicyLoader {
    pub fn from_client(client: Client) -> Self {
        PolicyCache::new(SsmPolicyFetcher::new(client))
    }
}
