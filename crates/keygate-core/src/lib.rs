//! keygate-core
//!
//! Pure domain types: the three governed entities, their status machines,
//! and the opaque-ID conventions. No AWS SDK dependency; this is the
//! shared vocabulary of the keygate system.

pub mod error;
pub mod ids;
pub mod models;
pub mod time;
