//! The notification seam. Transports live outside the core; the
//! workflows emit through this trait write-first, so a failed or slow
//! notification never fails the operation that triggered it.

use jiff::Timestamp;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

#[derive(Debug, Clone)]
pub enum Notification {
    BreakGlassInvoked {
        event_id: String,
        invoker: String,
        profile: String,
        reason_code: String,
        expires_at: Timestamp,
    },
    RequestCreated {
        request_id: String,
        requester: String,
        profile: String,
        status: String,
    },
    RequestDecided {
        request_id: String,
        approver: String,
        status: String,
    },
    SessionRevoked {
        session_id: String,
        revoked_by: String,
        reason: String,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        notification: &Notification,
    ) -> impl std::future::Future<Output = Result<(), NotifyError>> + Send;
}

/// Discards notifications.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    async fn notify(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Emits notifications as structured log events.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification {
            Notification::BreakGlassInvoked {
                event_id,
                invoker,
                profile,
                reason_code,
                expires_at,
            } => info!(
                event_id = %event_id,
                invoker = %invoker,
                profile = %profile,
                reason_code = %reason_code,
                expires_at = %expires_at,
                "break-glass invoked"
            ),
            Notification::RequestCreated {
                request_id,
                requester,
                profile,
                status,
            } => info!(
                request_id = %request_id,
                requester = %requester,
                profile = %profile,
                status = %status,
                "access request created"
            ),
            Notification::RequestDecided {
                request_id,
                approver,
                status,
            } => info!(
                request_id = %request_id,
                approver = %approver,
                status = %status,
                "access request decided"
            ),
            Notification::SessionRevoked {
                session_id,
                revoked_by,
                reason,
            } => info!(
                session_id = %session_id,
                revoked_by = %revoked_by,
                reason = %reason,
                "session revoked"
            ),
        }
        Ok(())
    }
}
