//! Error types for the dispatch core.

use thiserror::Error;

use crate::resource::ResourceIdentity;

/// Result type alias for dispatch-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Dispatch-core error taxonomy.
///
/// `FilterEvaluation`, `Callback`, `FinalizerWrite` and `StatusWrite` all
/// feed the retry scheduler identically unless explicitly marked
/// non-retryable. `InvalidConfig` is fatal at construction time and never
/// retried at runtime.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A significance filter failed while evaluating an event. Treated as
    /// "significant" by callers (fail open) so real changes are not dropped.
    #[error("filter evaluation failed for {identity}: {reason}")]
    FilterEvaluation {
        identity: ResourceIdentity,
        reason: String,
    },

    /// The user reconciliation callback failed or panicked.
    #[error("reconciliation callback failed for {identity}: {reason}")]
    Callback {
        identity: ResourceIdentity,
        reason: String,
    },

    /// Adding or removing a finalizer on the external store failed.
    #[error("finalizer write failed for {identity}: {reason}")]
    FinalizerWrite {
        identity: ResourceIdentity,
        reason: String,
    },

    /// Writing the status subresource failed.
    #[error("status write failed for {identity}: {reason}")]
    StatusWrite {
        identity: ResourceIdentity,
        reason: String,
    },

    /// A write to the external store failed for another reason.
    #[error("store operation '{operation}' failed: {reason}")]
    StoreFailed { operation: String, reason: String },

    /// Invalid controller configuration. Aborts initialization.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The work submission channel was closed.
    #[error("work channel closed")]
    ChannelClosed,
}

impl Error {
    /// Create a filter evaluation error.
    pub fn filter_evaluation(identity: ResourceIdentity, reason: impl Into<String>) -> Self {
        Self::FilterEvaluation {
            identity,
            reason: reason.into(),
        }
    }

    /// Create a callback error.
    pub fn callback(identity: ResourceIdentity, reason: impl Into<String>) -> Self {
        Self::Callback {
            identity,
            reason: reason.into(),
        }
    }

    /// Create a finalizer write error.
    pub fn finalizer_write(identity: ResourceIdentity, reason: impl Into<String>) -> Self {
        Self::FinalizerWrite {
            identity,
            reason: reason.into(),
        }
    }

    /// Create a status write error.
    pub fn status_write(identity: ResourceIdentity, reason: impl Into<String>) -> Self {
        Self::StatusWrite {
            identity,
            reason: reason.into(),
        }
    }

    /// Create a store operation error.
    pub fn store_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let identity = ResourceIdentity::new("ns", "obj", "Widget");
        let err = Error::callback(identity, "boom");
        assert!(err.to_string().contains("Widget/ns/obj"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_filter_evaluation_display() {
        let identity = ResourceIdentity::new("ns", "obj", "Widget");
        let err = Error::filter_evaluation(identity, "filter 'broken' panicked during evaluation");
        assert!(err.to_string().contains("filter evaluation failed"));
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_invalid_config_display() {
        let err = Error::invalid_config("name must not be blank");
        assert!(err.to_string().contains("name must not be blank"));
    }
}
