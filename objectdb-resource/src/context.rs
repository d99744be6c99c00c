//! Deadline plumbing (spec §5). An explicit `Option<Instant>` threaded
//! through the pipeline and checked at each suspension point, rather than
//! relying on dropping a future to signal cancellation (§9 DESIGN NOTES).

use objectdb_errors::{ErrorContext, ObjectDbError, ObjectDbResult};
use std::future::Future;
use tokio::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct OpContext {
    pub resource: String,
    pub op: String,
    pub deadline: Option<Instant>,
}

impl OpContext {
    pub fn new(resource: impl Into<String>, op: impl Into<String>) -> Self {
        Self { resource: resource.into(), op: op.into(), deadline: None }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: std::time::Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Applies a caller-supplied deadline if one was given; a no-op
    /// otherwise. Every external-facing `Resource` operation accepts an
    /// optional deadline and threads it through via this.
    pub fn with_deadline_opt(mut self, deadline: Option<Instant>) -> Self {
        if let Some(deadline) = deadline {
            self.deadline = Some(deadline);
        }
        self
    }

    fn cancelled_error(&self) -> ObjectDbError {
        ObjectDbError::Cancelled { context: ErrorContext::new().with_resource(&self.resource) }
    }
}

/// Awaits `fut`, but only until `ctx`'s deadline (if any) elapses. Every
/// method that maps to an object-store call or an async hook wraps its await
/// with this.
pub async fn with_deadline<T>(ctx: &OpContext, fut: impl Future<Output = ObjectDbResult<T>>) -> ObjectDbResult<T> {
    match ctx.deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(ctx.cancelled_error()),
        },
        None => fut.await,
    }
}
