//! # Feedlease
//! Partition-lease coordination for change feed consumers.
//!
//! A set of workers cooperatively consume an ordered, partitioned change log.
//! Each worker owns a disjoint subset of the log through persisted leases,
//! checkpoints its progress with optimistic concurrency, and adapts when a
//! partition splits into several successors or merges into a wider one,
//! without losing or duplicating any acknowledged position.
//!
//! Alongside lease coordination, the crate governs outgoing requests with
//! per-group throughput control: each request is gated and annotated by the
//! controller of its group, and controllers are built lazily, exactly once.
//!
//! ## Building blocks
//!
//! - [`LeaseManager`](lease::LeaseManager): async abstraction over the lease store
//! - [`FeedRangeContinuation`](continuation::FeedRangeContinuation): progress
//!   that can be rebound onto a child or relabeled range
//! - [`GoneHandlerFactory`](handler::GoneHandlerFactory): split and merge reactions
//! - [`PartitionProcessor`](processor::PartitionProcessor): the drain loop for one lease
//! - [`ThroughputContainerController`](throughput::ThroughputContainerController):
//!   per-group request gating
//! - [`AsyncCache`](cache::AsyncCache): single-flight async memoization
//!
//! ## Getting started
//!
//! ```rust,ignore
//! use feedlease::prelude::*;
//! use std::sync::Arc;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let processor = PartitionProcessor::new(
//!     lease_manager.clone(),
//!     Arc::new(MySource::new()),
//!     Arc::new(MyObserver),
//!     FeedConfig::from_env()?,
//!     shutdown_rx,
//! );
//!
//! let lease = lease_manager
//!     .create_lease_if_not_exist(&FeedRange::epk(EpkRange::full()), "")
//!     .await?;
//! let lease = lease_manager.acquire(&lease, "worker-a").await?;
//!
//! match processor.run(lease).await? {
//!     ProcessorOutcome::PartitionGone(outcome) => { /* hand outcome.leases to the balancer */ }
//!     ProcessorOutcome::LeaseLost | ProcessorOutcome::Stopped => {}
//! }
//! ```

#![forbid(unsafe_code)]

pub mod cache;
pub mod config;
pub mod constants;
pub mod continuation;
pub mod error;
pub mod handler;
pub mod lease;
pub mod metrics;
pub mod processor;
pub mod retry;
pub mod telemetry;
pub mod throughput;
pub mod topology;
pub mod types;

pub mod prelude {
    //! Commonly used types.
    pub use crate::cache::AsyncCache;
    pub use crate::config::{
        FeedConfig, PriorityLevel, ThroughputControlConfig, ThroughputControlGroup,
    };
    pub use crate::continuation::FeedRangeContinuation;
    pub use crate::error::{FeedError, FeedResult};
    pub use crate::handler::{
        FeedRangeGoneHandler, GoneHandlerFactory, GoneOutcome, MergeHandler, SplitHandler,
    };
    pub use crate::lease::{Lease, LeaseManager};
    pub use crate::processor::{
        ChangeFeedObserver, ChangeFeedSource, ChangeRecord, FeedPage, FeedResponse,
        PartitionProcessor, ProcessorOutcome,
    };
    pub use crate::throughput::{
        RequestCharge, ThroughputContainerController, ThroughputGroupController,
        ThroughputRequest,
    };
    pub use crate::topology::PartitionTopologyProvider;
    pub use crate::types::{EpkRange, FeedRange, PartitionDescriptor};

    #[cfg(any(test, feature = "test-utilities"))]
    pub use crate::lease::InMemoryLeaseManager;
    #[cfg(any(test, feature = "test-utilities"))]
    pub use crate::topology::InMemoryTopology;
}
