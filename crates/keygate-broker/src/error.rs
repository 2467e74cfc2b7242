use keygate_audit::AuditError;
use keygate_core::error::CoreError;
use keygate_identity::IdentityError;
use keygate_policy::PolicyError;
use keygate_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unknown profile: {0} (not present in the profile registry)")]
    UnknownProfile(String),

    #[error("access denied: {reason}")]
    AccessDenied { reason: String },

    #[error("user {caller} is not authorized to approve requests for profile {profile}")]
    Unauthorized { caller: String, profile: String },

    #[error("an active break-glass event already exists for {invoker} on {profile}")]
    DuplicateActive { invoker: String, profile: String },

    #[error("session already revoked: {id}")]
    AlreadyRevoked { id: String },

    #[error("session expired: {id}")]
    SessionExpired { id: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl BrokerError {
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, BrokerError::Core(CoreError::InvalidTransition { .. }))
    }

    pub fn is_concurrent_modification(&self) -> bool {
        matches!(
            self,
            BrokerError::Store(StoreError::ConcurrentModification { .. })
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BrokerError::Store(StoreError::NotFound { .. }))
    }
}
