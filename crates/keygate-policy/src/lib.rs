//! keygate-policy
//!
//! The policy plane: the access-policy and approval-policy YAML documents,
//! the pure first-match evaluator, the SSM-backed loader with its
//! single-flight cache, and the KMS signing facade that makes a loaded
//! policy trustworthy.

pub mod approval;
pub mod cache;
pub mod document;
pub mod error;
pub mod loader;
pub mod signing;

pub use approval::{ApprovalPolicy, ApprovalRule, AutoApprove};
pub use cache::CachedPolicyLoader;
pub use document::{Decision, Effect, Policy, PolicyRequest, PolicyRule, TimeWindow};
pub use error::PolicyError;
pub use signing::{PolicySigner, SignatureArtifact, SignatureMetadata};
