pub mod breakglass;
pub mod request;
pub mod session;

pub use breakglass::{BreakGlassEvent, BreakGlassStatus, ReasonCode};
pub use request::{AccessRequest, RequestStatus};
pub use session::{ServerSession, SessionStatus};
