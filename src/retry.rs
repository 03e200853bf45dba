//! Retry policies for lease store operations.
//!
//! Transient store failures (timeouts, throttling) are retried with jittered
//! exponential backoff using the `backon` crate. Ownership conflicts are never
//! retried: they mean the lease moved to another worker.
//!
//! | Policy | Min Delay | Max Delay | Retries | Use Case |
//! |--------|-----------|-----------|---------|----------|
//! | `store_policy` | 10ms | 1s | 5 | Checkpoints, lease deletion |
//!
//! # Example
//!
//! ```rust,ignore
//! use feedlease::retry;
//!
//! let lease = retry::with_store_policy(
//!     || async { lease_manager.checkpoint(&lease, &token).await },
//!     |e| e.is_transient(),
//! )
//! .await?;
//! ```

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

/// Policy for lease store writes.
///
/// - Short initial delay (10ms) for fast recovery from throttling
/// - Max delay of 1s so a stuck store surfaces quickly
/// - Five retries, with jitter
pub fn store_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_secs(1))
        .with_max_times(5)
        .with_jitter()
}

/// Execute an async operation with the store retry policy.
pub async fn with_store_policy<F, Fut, T, E, C>(operation: F, condition: C) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::error::Error,
    C: FnMut(&E) -> bool,
{
    operation.retry(store_policy()).when(condition).await
}
