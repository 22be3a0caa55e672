//! User-callback seam.
//!
//! The dispatch core treats reconciliation business logic as an opaque
//! async callback: it governs when and how often the callback runs, never
//! what it does. Callbacks must be idempotent; coalescing means not every
//! raw event produces its own invocation, only that the final visible
//! state is eventually reconciled.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::resource::{Resource, ResourceIdentity};

/// Invocation context handed to the callback.
#[derive(Debug, Clone)]
pub struct Context {
    /// Identity being reconciled.
    pub identity: ResourceIdentity,
    /// Whether this invocation is a deletion pass (cleanup before the
    /// finalizer is cleared).
    pub deletion_pass: bool,
    /// Completed attempts in the current failure chain; 0 on a fresh run.
    pub attempt: u32,
}

impl Context {
    /// Create a context for a regular reconciliation.
    pub fn new(identity: ResourceIdentity, attempt: u32) -> Self {
        Self {
            identity,
            deletion_pass: false,
            attempt,
        }
    }

    /// Create a context for a deletion pass.
    pub fn deletion(identity: ResourceIdentity, attempt: u32) -> Self {
        Self {
            identity,
            deletion_pass: true,
            attempt,
        }
    }

    /// Whether this is a retry of a previously failed attempt.
    pub fn is_retry(&self) -> bool {
        self.attempt > 0
    }
}

/// Result of one callback invocation.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Reconciliation (or cleanup) succeeded.
    Success {
        /// Request a future re-reconciliation after this delay.
        requeue_after: Option<Duration>,
        /// Status subresource patch to write back, if any. Ignored on
        /// deletion passes.
        status_patch: Option<Value>,
    },
    /// Reconciliation failed.
    Failed {
        /// Failure description.
        reason: String,
        /// Whether the retry scheduler may re-attempt. Non-retryable
        /// failures surface immediately.
        retryable: bool,
    },
    /// Cleanup is underway but not finished; keep the finalizer and check
    /// again later.
    CleanupPending,
}

impl Outcome {
    /// A plain success with nothing else to do.
    pub fn success() -> Self {
        Self::Success {
            requeue_after: None,
            status_patch: None,
        }
    }

    /// Success that requests a future re-reconciliation.
    pub fn requeue_after(delay: Duration) -> Self {
        Self::Success {
            requeue_after: Some(delay),
            status_patch: None,
        }
    }

    /// Success with a status patch to write back.
    pub fn success_with_status(status_patch: Value) -> Self {
        Self::Success {
            requeue_after: None,
            status_patch: Some(status_patch),
        }
    }

    /// A retryable failure.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            retryable: true,
        }
    }

    /// A failure that must not be retried.
    pub fn failed_no_retry(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            retryable: false,
        }
    }

    /// Whether this outcome is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// User-supplied reconciliation logic.
///
/// `resource` is the current known snapshot (the last known one on a
/// deletion pass). Implementations may block on I/O against the external
/// store; the worker holds the identity's execution token for the whole
/// invocation.
#[async_trait]
pub trait Reconciler<R: Resource>: Send + Sync {
    /// Drive the resource toward its desired state.
    async fn reconcile(&self, resource: R, ctx: &Context) -> Outcome;
}
