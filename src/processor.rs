//! The consumption loop for a single lease.
//!
//! A [`PartitionProcessor`] drains one lease's feed range: it reads batches
//! from a [`ChangeFeedSource`] starting at the lease's continuation, hands
//! them to a [`ChangeFeedObserver`], and checkpoints the new position through
//! the [`LeaseManager`]. Checkpoints are version-guarded, so a worker that
//! lost the lease finds out on its next checkpoint and stops.
//!
//! When the source reports that the partition is gone, the processor builds
//! the matching gone handler, creates the successor leases and deletes the
//! current lease if the handler asks for it.
//!
//! # Outcomes
//!
//! | Outcome | Trigger |
//! |---------|---------|
//! | [`ProcessorOutcome::Stopped`] | shutdown signal; the lease is released |
//! | [`ProcessorOutcome::LeaseLost`] | checkpoint conflict; nothing is cleaned up |
//! | [`ProcessorOutcome::PartitionGone`] | split, or merge of a partition lease |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::continuation::FeedRangeContinuation;
use crate::error::{FeedError, FeedResult};
use crate::handler::{GoneHandlerFactory, GoneOutcome};
use crate::lease::{Lease, LeaseManager};
use crate::metrics;
use crate::retry;
use crate::throughput::{RequestCharge, ThroughputContainerController, ThroughputRequest};
use crate::topology::PartitionTopologyProvider;
use crate::types::PartitionDescriptor;

/// One change read from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Effective partition key of the changed item.
    pub epk: String,
    /// Log sequence number.
    pub lsn: u64,
    pub payload: serde_json::Value,
}

/// What a read of the change log returned.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedResponse {
    /// New changes, and the cursor positioned after them.
    Changes {
        records: Vec<ChangeRecord>,
        continuation: String,
    },
    /// Nothing new since the given position.
    NotModified,
    /// The partition serving the range split or merged away. `successors`
    /// may be empty if the source does not know them.
    Gone { successors: Vec<PartitionDescriptor> },
}

/// A read response with its cost in request units.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage {
    pub response: FeedResponse,
    pub request_charge: f64,
}

impl FeedPage {
    pub fn new(response: FeedResponse) -> Self {
        Self {
            response,
            request_charge: 0.0,
        }
    }

    pub fn with_charge(mut self, request_units: f64) -> Self {
        self.request_charge = request_units;
        self
    }
}

impl RequestCharge for FeedPage {
    fn request_charge(&self) -> f64 {
        self.request_charge
    }
}

/// Reads the change log.
#[async_trait]
pub trait ChangeFeedSource: Send + Sync {
    /// Read up to `max_item_count` changes after `position`.
    ///
    /// `request` carries the annotations stamped by throughput control.
    async fn read_feed(
        &self,
        request: ThroughputRequest,
        position: &FeedRangeContinuation,
        max_item_count: usize,
    ) -> FeedResult<FeedPage>;
}

/// Receives the changes of a lease.
#[async_trait]
pub trait ChangeFeedObserver: Send + Sync {
    async fn process_changes(&self, lease: &Lease, changes: &[ChangeRecord]) -> FeedResult<()>;
}

/// How [`PartitionProcessor::run`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorOutcome {
    Stopped,
    LeaseLost,
    PartitionGone(GoneOutcome),
}

/// Drains one lease.
pub struct PartitionProcessor {
    lease_manager: Arc<dyn LeaseManager>,
    source: Arc<dyn ChangeFeedSource>,
    observer: Arc<dyn ChangeFeedObserver>,
    topology: Option<Arc<dyn PartitionTopologyProvider>>,
    throughput: Option<(Arc<ThroughputContainerController>, Option<String>)>,
    gone_handlers: GoneHandlerFactory,
    config: FeedConfig,
    shutdown: watch::Receiver<bool>,
}

impl PartitionProcessor {
    pub fn new(
        lease_manager: Arc<dyn LeaseManager>,
        source: Arc<dyn ChangeFeedSource>,
        observer: Arc<dyn ChangeFeedObserver>,
        config: FeedConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            gone_handlers: GoneHandlerFactory::new(lease_manager.clone(), config.max_scale_count),
            lease_manager,
            source,
            observer,
            topology: None,
            throughput: None,
            config,
            shutdown,
        }
    }

    /// Look up successors here when a gone signal does not carry them.
    pub fn with_topology(mut self, topology: Arc<dyn PartitionTopologyProvider>) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Route reads through throughput control under `group` (`None` uses the
    /// default group).
    pub fn with_throughput(
        mut self,
        controller: Arc<ThroughputContainerController>,
        group: Option<String>,
    ) -> Self {
        self.throughput = Some((controller, group));
        self
    }

    /// Drain `lease` until shutdown, loss of ownership, or the partition is
    /// gone.
    ///
    /// `lease` must be owned by this worker. Errors from the source, the
    /// observer or the lease store (after retries) are returned as-is.
    pub async fn run(&self, lease: Lease) -> FeedResult<ProcessorOutcome> {
        let mut lease = lease;
        let mut position = lease.continuation()?;
        info!(lease = %lease.lease_token, range = %position.range(), "Starting lease processing");

        loop {
            if *self.shutdown.borrow() {
                return Ok(self.stop(&lease).await);
            }

            let page = match self.read(&position).await {
                Ok(page) => page,
                Err(FeedError::Throttled { group, retry_after }) => {
                    debug!(
                        lease = %lease.lease_token,
                        group = %group,
                        ?retry_after,
                        "Read throttled"
                    );
                    if self.wait(retry_after).await {
                        return Ok(self.stop(&lease).await);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            match page.response {
                FeedResponse::Changes {
                    records,
                    continuation,
                } => {
                    if !records.is_empty() {
                        self.observer.process_changes(&lease, &records).await?;
                    }
                    position.advance(continuation);
                    match self.checkpoint(&lease, &position).await {
                        Ok(updated) => lease = updated,
                        Err(e) if e.is_lease_lost() => {
                            info!(lease = %lease.lease_token, "Lease lost, abandoning processing");
                            return Ok(ProcessorOutcome::LeaseLost);
                        }
                        Err(e) => return Err(e),
                    }
                    debug!(lease = %lease.lease_token, changes = records.len(), "Checkpointed");
                }
                FeedResponse::NotModified => {
                    if self.wait(self.config.feed_poll_delay).await {
                        return Ok(self.stop(&lease).await);
                    }
                }
                FeedResponse::Gone { successors } => {
                    match self.handle_gone(&lease, successors).await {
                        Ok(Some(outcome)) => return Ok(outcome),
                        // Lease still valid across the topology change.
                        Ok(None) => {}
                        Err(e) if e.is_lease_lost() => {
                            info!(
                                lease = %lease.lease_token,
                                "Lease lost while handling partition gone"
                            );
                            return Ok(ProcessorOutcome::LeaseLost);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    async fn read(&self, position: &FeedRangeContinuation) -> FeedResult<FeedPage> {
        let max_item_count = self.config.max_item_count;
        match &self.throughput {
            Some((controller, group)) => {
                let mut request = ThroughputRequest::new("read_feed");
                request.group_name = group.clone();
                controller
                    .process_request(request, |request| {
                        self.source.read_feed(request, position, max_item_count)
                    })
                    .await
            }
            None => {
                self.source
                    .read_feed(ThroughputRequest::new("read_feed"), position, max_item_count)
                    .await
            }
        }
    }

    async fn checkpoint(
        &self,
        lease: &Lease,
        position: &FeedRangeContinuation,
    ) -> FeedResult<Lease> {
        let token = position.to_token()?;
        let result = retry::with_store_policy(
            || self.lease_manager.checkpoint(lease, &token),
            |e: &FeedError| {
                if e.is_transient() {
                    warn!(lease = %lease.lease_token, error = %e, "Checkpoint failed, retrying");
                }
                e.is_transient()
            },
        )
        .await;

        let status = match &result {
            Ok(_) => "success",
            Err(e) => e.as_metric_label(),
        };
        metrics::LEASE_OPERATIONS
            .with_label_values(&["checkpoint", status])
            .inc();
        result
    }

    /// Run the gone handler. Returns `None` when the current lease stays
    /// valid and processing should continue.
    async fn handle_gone(
        &self,
        lease: &Lease,
        successors: Vec<PartitionDescriptor>,
    ) -> FeedResult<Option<ProcessorOutcome>> {
        let successors = if successors.is_empty() {
            self.lookup_successors(lease).await?
        } else {
            successors
        };

        info!(
            lease = %lease.lease_token,
            successors = successors.len(),
            "Partition gone"
        );
        let handler = self.gone_handlers.create(lease.clone(), successors)?;
        let outcome = handler.handle_partition_gone().await?;

        if !outcome.delete_current_lease {
            return Ok(None);
        }

        // The successors exist now; only the owner may retire the lease.
        crate::handler::ensure_still_held(self.lease_manager.as_ref(), lease).await?;
        retry::with_store_policy(
            || self.lease_manager.delete(lease),
            |e: &FeedError| e.is_transient(),
        )
        .await?;
        metrics::LEASE_OPERATIONS
            .with_label_values(&["delete", "success"])
            .inc();
        info!(
            lease = %lease.lease_token,
            successors = outcome.leases.len(),
            skip_direct_assignment = outcome.skip_direct_assignment,
            "Replaced gone lease with successors"
        );
        Ok(Some(ProcessorOutcome::PartitionGone(outcome)))
    }

    async fn lookup_successors(&self, lease: &Lease) -> FeedResult<Vec<PartitionDescriptor>> {
        let Some(topology) = &self.topology else {
            return Err(FeedError::PartitionTopology(format!(
                "gone signal for lease {} carried no successors and no topology provider is set",
                lease.lease_token
            )));
        };

        let gone_id = lease.feed_range.partition_id();
        let successors = topology
            .overlapping_partitions(lease.feed_range.epk_range())
            .await?
            .into_iter()
            .filter(|p| Some(p.id.as_str()) != gone_id)
            .collect();
        Ok(successors)
    }

    /// Sleep for `delay` unless shutdown is requested first. Returns true on
    /// shutdown.
    async fn wait(&self, delay: Duration) -> bool {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        }
    }

    /// Give up ownership on shutdown so another worker can take over.
    async fn stop(&self, lease: &Lease) -> ProcessorOutcome {
        match self.lease_manager.release(lease).await {
            Ok(_) => info!(lease = %lease.lease_token, "Released lease on shutdown"),
            Err(e) => warn!(
                lease = %lease.lease_token,
                error = %e,
                "Failed to release lease on shutdown"
            ),
        }
        ProcessorOutcome::Stopped
    }
}
