//! Error types for lease coordination and throughput control.
//!
//! # Error Handling Patterns
//!
//! Errors fall into three groups, and callers are expected to react to each
//! group differently:
//!
//! ## Retry
//!
//! [`FeedError::TransientStore`] means the lease store timed out or throttled
//! the call. The operation can be retried with backoff (see
//! [`retry`](crate::retry)). Gone handlers are safe to re-run from scratch
//! because lease creation is idempotent.
//!
//! ## Abandon
//!
//! [`FeedError::LeaseConflict`] and [`FeedError::LeaseNotFound`] mean the
//! lease was updated or deleted by someone else. Ownership moved, so the
//! worker stops processing the lease without reporting a failure upward.
//!
//! ## Surface
//!
//! [`FeedError::PartitionTopology`] and [`FeedError::Config`] indicate
//! inconsistent metadata or a broken configuration. They are fatal for the
//! lease (or the controller) involved and must reach the operator.
//!
//! Failures are isolated: one lease's split failing never blocks another
//! lease, and one throughput group failing to initialize never blocks the
//! others.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Result type for lease coordination and throughput control.
pub type FeedResult<T> = Result<T, FeedError>;

/// Errors raised by the lease store, the gone handlers, the continuation
/// translator and the throughput controllers.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Retryable store failure (timeout, throttling).
    #[error("Transient store error: {0}")]
    TransientStore(String),

    /// Optimistic concurrency check failed: the lease was updated by another
    /// worker, or its owner changed.
    #[error("Lease {lease_token} conflict: ownership or version changed")]
    LeaseConflict { lease_token: String },

    /// The lease record no longer exists in the store.
    #[error("Lease {lease_token} not found")]
    LeaseNotFound { lease_token: String },

    /// Topology metadata does not agree with the gone signal.
    #[error("Partition topology error: {0}")]
    PartitionTopology(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Continuation token could not be decoded or does not match its lease.
    #[error("Invalid continuation token: {0}")]
    InvalidContinuation(String),

    /// The request exceeded its throughput-control group's budget.
    #[error("Throughput group {group} throttled, retry after {retry_after:?}")]
    Throttled { group: String, retry_after: Duration },

    /// Building a throughput group controller failed.
    ///
    /// The source is shared between every caller that waited on the same
    /// construction.
    #[error("Throughput controller for group {group} failed to initialize: {source}")]
    ControllerInit {
        group: String,
        #[source]
        source: Arc<FeedError>,
    },

    /// The change feed source failed.
    #[error("Change feed source error: {0}")]
    Source(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl FeedError {
    /// Create a lease conflict error for the given token.
    pub fn conflict(lease_token: impl Into<String>) -> Self {
        FeedError::LeaseConflict {
            lease_token: lease_token.into(),
        }
    }

    /// Create a lease-not-found error for the given token.
    pub fn not_found(lease_token: impl Into<String>) -> Self {
        FeedError::LeaseNotFound {
            lease_token: lease_token.into(),
        }
    }

    /// Returns true if the operation may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::TransientStore(_))
    }

    /// Returns true if the error means this worker no longer owns the lease.
    pub fn is_lease_lost(&self) -> bool {
        matches!(
            self,
            FeedError::LeaseConflict { .. } | FeedError::LeaseNotFound { .. }
        )
    }

    /// Returns a short label for metrics.
    pub fn as_metric_label(&self) -> &'static str {
        match self {
            FeedError::TransientStore(_) => "transient",
            FeedError::LeaseConflict { .. } => "conflict",
            FeedError::LeaseNotFound { .. } => "not_found",
            FeedError::PartitionTopology(_) => "topology",
            FeedError::Config(_) => "config",
            FeedError::InvalidContinuation(_) => "continuation",
            FeedError::Throttled { .. } => "throttled",
            FeedError::ControllerInit { .. } => "controller_init",
            FeedError::Source(_) => "source",
            FeedError::Serde(_) => "serde",
        }
    }
}
