//! keygate-store
//!
//! One DynamoDB table per governed entity, partition key `id`, GSIs for
//! the secondary lookups, conditional writes for create-if-absent and
//! optimistic locking. The in-memory stores implement the same traits for
//! tests and local mode.

pub mod breakglass;
pub mod error;
pub mod item;
pub mod memory;
pub mod requests;
pub mod sessions;

pub use breakglass::{BreakGlassStore, DynamoBreakGlassStore};
pub use error::StoreError;
pub use memory::{MemoryBreakGlassStore, MemoryRequestStore, MemorySessionStore};
pub use requests::{DynamoRequestStore, RequestStore};
pub use sessions::{DynamoSessionStore, SessionStore};
