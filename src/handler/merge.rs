//! Merge handling: the lease's partition was folded into a wider one.
//!
//! A merge changes which physical partition serves a key interval, not the
//! interval itself. EPK-range leases therefore stay valid verbatim and keep
//! draining. Leases addressed by the defunct partition id cannot be redirected
//! in place and migrate to an EPK-range lease over the same interval.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tracing::info;

use super::{FeedRangeGoneHandler, ensure_still_held};
use crate::error::{FeedError, FeedResult};
use crate::lease::{Lease, LeaseManager};
use crate::metrics;
use crate::types::{FeedRange, PartitionDescriptor};

/// Handles a partition that merged into a single successor.
pub struct MergeHandler {
    lease: Lease,
    successor: PartitionDescriptor,
    lease_manager: Arc<dyn LeaseManager>,
    max_scale_count: usize,
}

impl MergeHandler {
    /// `successor` must cover the whole lease range.
    pub fn new(
        lease: Lease,
        successor: PartitionDescriptor,
        lease_manager: Arc<dyn LeaseManager>,
        max_scale_count: usize,
    ) -> Self {
        Self {
            lease,
            successor,
            lease_manager,
            max_scale_count,
        }
    }

    fn validate(&self) -> FeedResult<()> {
        let range = self.lease.feed_range.epk_range();
        if self.successor.range.contains_range(range) {
            Ok(())
        } else {
            Err(FeedError::PartitionTopology(format!(
                "merge successor {} {} does not cover lease {} {}",
                self.successor.id, self.successor.range, self.lease.lease_token, range
            )))
        }
    }

    async fn migrate_to_epk(&self) -> FeedResult<Lease> {
        ensure_still_held(self.lease_manager.as_ref(), &self.lease).await?;

        let range = self.lease.feed_range.epk_range().clone();
        let token = self.lease.continuation()?.rebind(&range)?.to_token()?;
        let mut migrated = self
            .lease_manager
            .create_lease_if_not_exist(&FeedRange::epk(range), &token)
            .await?;

        if migrated.properties.is_empty() && !self.lease.properties.is_empty() {
            migrated.properties = self.lease.properties.clone();
            migrated = self.lease_manager.update_properties(&migrated).await?;
        }

        info!(
            lease = %self.lease.lease_token,
            migrated = %migrated.lease_token,
            successor = %self.successor.id,
            "Migrated partition lease to effective key range"
        );
        metrics::LEASE_OPERATIONS
            .with_label_values(&["merge_migrate", "success"])
            .inc();
        Ok(migrated)
    }
}

#[async_trait]
impl FeedRangeGoneHandler for MergeHandler {
    fn should_delete_current_lease(&self) -> bool {
        self.lease.is_partition_addressed()
    }

    fn should_skip_direct_assignment(&self) -> bool {
        self.max_scale_count > 0
    }

    fn leases(&self) -> BoxStream<'_, FeedResult<Lease>> {
        if let Err(e) = self.validate() {
            metrics::GONE_HANDLED
                .with_label_values(&["merge", e.as_metric_label()])
                .inc();
            return stream::once(async move { Err::<Lease, FeedError>(e) }).boxed();
        }

        match &self.lease.feed_range {
            FeedRange::Partition { .. } => {
                metrics::GONE_HANDLED
                    .with_label_values(&["merge", "migrate"])
                    .inc();
                stream::once(self.migrate_to_epk()).boxed()
            }
            FeedRange::Epk { range } => {
                info!(
                    lease = %self.lease.lease_token,
                    range = %range,
                    successor = %self.successor.id,
                    "Keeping effective key range lease across merge"
                );
                metrics::GONE_HANDLED
                    .with_label_values(&["merge", "keep"])
                    .inc();
                stream::empty::<FeedResult<Lease>>().boxed()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::FeedRangeContinuation;
    use crate::lease::InMemoryLeaseManager;
    use crate::types::EpkRange;

    fn range(min: &str, max: &str) -> EpkRange {
        EpkRange::new(min, max).unwrap()
    }

    async fn owned(store: &InMemoryLeaseManager, feed_range: FeedRange, token: &str) -> Lease {
        let lease = store
            .create_lease_if_not_exist(&feed_range, token)
            .await
            .unwrap();
        store.acquire(&lease, "worker-a").await.unwrap()
    }

    #[tokio::test]
    async fn test_partition_lease_migrates_to_epk() {
        let store = InMemoryLeaseManager::new();
        let lease = owned(&store, FeedRange::partition("4", range("40", "80")), "etag-9").await;
        let handler = MergeHandler::new(
            lease,
            PartitionDescriptor::new("7", range("00", "80")),
            Arc::new(store.clone()),
            0,
        );

        assert!(handler.should_delete_current_lease());
        let outcome = handler.handle_partition_gone().await.unwrap();
        assert!(outcome.delete_current_lease);
        assert_eq!(outcome.leases.len(), 1);

        let migrated = &outcome.leases[0];
        assert_eq!(migrated.feed_range, FeedRange::epk(range("40", "80")));
        assert_eq!(
            migrated.continuation().unwrap(),
            FeedRangeContinuation::new(range("40", "80"), "etag-9")
        );
    }

    #[tokio::test]
    async fn test_epk_lease_is_kept() {
        let store = InMemoryLeaseManager::new();
        let lease = owned(&store, FeedRange::epk(range("40", "80")), "").await;
        let handler = MergeHandler::new(
            lease,
            PartitionDescriptor::new("7", range("00", "80")),
            Arc::new(store.clone()),
            0,
        );

        assert!(!handler.should_delete_current_lease());
        let outcome = handler.handle_partition_gone().await.unwrap();
        assert!(outcome.leases.is_empty());
        assert!(!outcome.delete_current_lease);
        assert_eq!(store.lease_count().await, 1);
    }

    #[tokio::test]
    async fn test_successor_must_cover_lease() {
        let store = InMemoryLeaseManager::new();
        let lease = owned(&store, FeedRange::partition("4", range("40", "90")), "").await;
        let handler = MergeHandler::new(
            lease,
            PartitionDescriptor::new("7", range("00", "80")),
            Arc::new(store.clone()),
            0,
        );
        let err = handler.handle_partition_gone().await.unwrap_err();
        assert!(matches!(err, FeedError::PartitionTopology(_)));
    }

    #[tokio::test]
    async fn test_migration_is_idempotent() {
        let store = InMemoryLeaseManager::new();
        let lease = owned(&store, FeedRange::partition("4", range("40", "80")), "etag-1").await;
        let handler = MergeHandler::new(
            lease,
            PartitionDescriptor::new("7", EpkRange::full()),
            Arc::new(store.clone()),
            2,
        );

        let first = handler.handle_partition_gone().await.unwrap();
        let second = handler.handle_partition_gone().await.unwrap();
        assert!(first.skip_direct_assignment);
        assert_eq!(first.leases[0].lease_token, second.leases[0].lease_token);
        assert_eq!(store.lease_count().await, 2);
    }
}
