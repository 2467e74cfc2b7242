//! keygate-identity
//!
//! The identity plane: resolving the caller's stable principal name from
//! STS, issuing role credentials with source-identity stamping, and the
//! credential-process output consumed by external tooling.

pub mod caller;
pub mod credentials;
pub mod error;
pub mod process;

pub use caller::{CallerIdentity, IdentityResolver, StsIdentityResolver};
pub use credentials::{CredentialIssuer, Credentials, IssueRequest, StsCredentialIssuer};
pub use error::IdentityError;
pub use process::CredentialProcessOutput;
