//! keygate-broker
//!
//! The orchestration layer: the approval workflow, the break-glass
//! workflow, the session plane, the profile registry, and the credential
//! broker hot path that composes them. Everything here works over
//! injected collaborators (stores, audit sink, notifier, identity
//! resolver, credential issuer) and never constructs AWS clients itself.

pub mod approval;
pub mod breakglass;
pub mod broker;
pub mod error;
pub mod notify;
pub mod profiles;
pub mod sessions;

pub use approval::ApprovalWorkflow;
pub use breakglass::BreakGlassWorkflow;
pub use broker::{CredentialBroker, IssueOutcome, IssueParams, OverrideSource};
pub use error::BrokerError;
pub use notify::{Notification, Notifier, NotifyError, NoopNotifier, TracingNotifier};
pub use profiles::{Profile, ProfileRegistry};
pub use sessions::{DeviceSummary, SessionPlane, aggregate_by_device};
