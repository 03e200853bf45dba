//! Split handling: one lease becomes one lease per successor partition.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tracing::{debug, info};

use super::{FeedRangeGoneHandler, ensure_still_held};
use crate::error::{FeedError, FeedResult};
use crate::lease::{Lease, LeaseManager};
use crate::metrics;
use crate::topology::validate_successors;
use crate::types::{EpkRange, FeedRange, PartitionDescriptor};

/// Child ranges for a split of `parent` into `successors`.
///
/// Inner boundaries come from the successors' upper bounds; the outer edges
/// are clamped to the parent so the children tile `[min, max)` exactly:
///
/// ```text
/// parent:      [A ......................... D)
/// successors:  [*, B)   [B, C)   [C, *)
/// children:    [A, B)   [B, C)   [C, D)
/// ```
pub fn child_ranges(
    parent: &EpkRange,
    successors: &[PartitionDescriptor],
) -> FeedResult<Vec<EpkRange>> {
    validate_successors(parent, successors)?;

    let mut children = Vec::with_capacity(successors.len());
    let mut lower = parent.min().to_string();
    for (i, successor) in successors.iter().enumerate() {
        let upper = if i + 1 == successors.len() {
            parent.max()
        } else {
            successor.range.max()
        };
        let child = EpkRange::new(lower, upper)?;
        lower = child.max().to_string();
        children.push(child);
    }
    Ok(children)
}

/// Handles a partition that split into several successors.
pub struct SplitHandler {
    lease: Lease,
    successors: Vec<PartitionDescriptor>,
    lease_manager: Arc<dyn LeaseManager>,
    max_scale_count: usize,
}

impl SplitHandler {
    /// `successors` must be ordered by ascending `min`.
    pub fn new(
        lease: Lease,
        successors: Vec<PartitionDescriptor>,
        lease_manager: Arc<dyn LeaseManager>,
        max_scale_count: usize,
    ) -> Self {
        Self {
            lease,
            successors,
            lease_manager,
            max_scale_count,
        }
    }

    /// Child ranges paired with the parent continuation rebinded onto each.
    fn plan(&self) -> FeedResult<Vec<(EpkRange, String)>> {
        let parent_range = self.lease.feed_range.epk_range();
        let continuation = self.lease.continuation()?;
        child_ranges(parent_range, &self.successors)?
            .into_iter()
            .map(|child| {
                let token = continuation.rebind(&child)?.to_token()?;
                Ok((child, token))
            })
            .collect()
    }

    async fn create_child(&self, range: EpkRange, token: String) -> FeedResult<Lease> {
        ensure_still_held(self.lease_manager.as_ref(), &self.lease).await?;

        let feed_range = FeedRange::epk(range);
        let mut child = self
            .lease_manager
            .create_lease_if_not_exist(&feed_range, &token)
            .await?;

        if child.properties.is_empty() && !self.lease.properties.is_empty() {
            child.properties = self.lease.properties.clone();
            child = self.lease_manager.update_properties(&child).await?;
        }

        debug!(
            parent = %self.lease.lease_token,
            child = %child.lease_token,
            "Created lease for split child"
        );
        metrics::LEASE_OPERATIONS
            .with_label_values(&["split_child", "success"])
            .inc();
        Ok(child)
    }
}

#[async_trait]
impl FeedRangeGoneHandler for SplitHandler {
    fn should_delete_current_lease(&self) -> bool {
        true
    }

    fn should_skip_direct_assignment(&self) -> bool {
        self.max_scale_count > 0
    }

    fn leases(&self) -> BoxStream<'_, FeedResult<Lease>> {
        let plan = match self.plan() {
            Ok(plan) => plan,
            Err(e) => {
                metrics::GONE_HANDLED
                    .with_label_values(&["split", e.as_metric_label()])
                    .inc();
                return stream::once(async move { Err::<Lease, FeedError>(e) }).boxed();
            }
        };

        info!(
            lease = %self.lease.lease_token,
            range = %self.lease.feed_range,
            children = plan.len(),
            "Splitting lease"
        );
        metrics::GONE_HANDLED
            .with_label_values(&["split", "planned"])
            .inc();

        stream::iter(plan)
            .then(move |(range, token)| self.create_child(range, token))
            .boxed()
    }
}
