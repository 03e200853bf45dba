//! Reactions to "partition gone" signals.
//!
//! When the change log reports that the physical partition behind a lease no
//! longer exists, exactly one [`FeedRangeGoneHandler`] is built for that
//! signal. It produces the successor leases and tells the caller what to do
//! with the current lease:
//!
//! | Handler | Lease addressing | New leases | Delete current |
//! |---------|------------------|------------|----------------|
//! | [`SplitHandler`] | any | one per child range | yes |
//! | [`MergeHandler`] | partition id | one EPK lease over the same range | yes |
//! | [`MergeHandler`] | EPK range | none | no |
//!
//! Handlers never mutate shared state to report their decision; the outcome
//! is returned as a [`GoneOutcome`]. Every step goes through
//! `create_lease_if_not_exist`, so a handler interrupted part-way can be
//! re-run from scratch without duplicating successors.

mod merge;
mod split;

use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use futures::stream::BoxStream;
use tracing::debug;

use crate::error::{FeedError, FeedResult};
use crate::lease::{Lease, LeaseManager};
use crate::types::PartitionDescriptor;

pub use merge::MergeHandler;
pub use split::{SplitHandler, child_ranges};

/// Result of handling a gone signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoneOutcome {
    /// Successor leases, in ascending key order.
    pub leases: Vec<Lease>,
    /// Whether the gone lease must be deleted by the caller.
    pub delete_current_lease: bool,
    /// Whether successors must go through the load balancer instead of being
    /// claimed directly by the current worker.
    pub skip_direct_assignment: bool,
}

/// Reaction to a partition-gone signal for one lease.
#[async_trait]
pub trait FeedRangeGoneHandler: Send + Sync {
    /// Whether the gone lease is superseded and must be deleted.
    fn should_delete_current_lease(&self) -> bool;

    /// Whether successor leases must be assigned by the cluster-wide balancer.
    fn should_skip_direct_assignment(&self) -> bool;

    /// Lazily create the successor leases.
    ///
    /// Each lease is created when the stream is polled for it. The stream
    /// yields an error if the current lease was reassigned in the meantime.
    fn leases(&self) -> BoxStream<'_, FeedResult<Lease>>;

    /// Drive [`leases`](Self::leases) to completion and report the outcome.
    ///
    /// Stops at the first error; re-running is safe.
    async fn handle_partition_gone(&self) -> FeedResult<GoneOutcome> {
        let leases: Vec<Lease> = self.leases().try_collect().await?;
        Ok(GoneOutcome {
            leases,
            delete_current_lease: self.should_delete_current_lease(),
            skip_direct_assignment: self.should_skip_direct_assignment(),
        })
    }
}

/// Builds the handler matching a gone signal.
#[derive(Clone)]
pub struct GoneHandlerFactory {
    lease_manager: Arc<dyn LeaseManager>,
    max_scale_count: usize,
}

impl GoneHandlerFactory {
    /// Create a factory. A non-zero `max_scale_count` routes successor leases
    /// through the load balancer.
    pub fn new(lease_manager: Arc<dyn LeaseManager>, max_scale_count: usize) -> Self {
        Self {
            lease_manager,
            max_scale_count,
        }
    }

    /// Split handler for several successors, merge handler for one.
    ///
    /// Only successors overlapping the lease range count: an EPK lease inside
    /// a split partition may still fall within a single successor.
    pub fn create(
        &self,
        lease: Lease,
        mut successors: Vec<PartitionDescriptor>,
    ) -> FeedResult<Box<dyn FeedRangeGoneHandler>> {
        let lease_range = lease.feed_range.epk_range();
        successors.retain(|s| s.range.overlaps(lease_range));
        successors.sort_by(|a, b| a.range.min().cmp(b.range.min()));
        match successors.len() {
            0 => Err(FeedError::PartitionTopology(format!(
                "gone signal for lease {} carried no successors overlapping its range",
                lease.lease_token
            ))),
            1 => {
                let successor = successors.remove(0);
                debug!(
                    lease = %lease.lease_token,
                    successor = %successor.id,
                    "Handling partition gone as merge"
                );
                Ok(Box::new(MergeHandler::new(
                    lease,
                    successor,
                    self.lease_manager.clone(),
                    self.max_scale_count,
                )))
            }
            n => {
                debug!(
                    lease = %lease.lease_token,
                    successors = n,
                    "Handling partition gone as split"
                );
                Ok(Box::new(SplitHandler::new(
                    lease,
                    successors,
                    self.lease_manager.clone(),
                    self.max_scale_count,
                )))
            }
        }
    }
}

/// Abort when the lease was reassigned or removed since the handler started.
pub(crate) async fn ensure_still_held(
    lease_manager: &dyn LeaseManager,
    lease: &Lease,
) -> FeedResult<()> {
    if lease_manager.is_still_held(lease).await? {
        Ok(())
    } else {
        Err(FeedError::conflict(&lease.lease_token))
    }
}
