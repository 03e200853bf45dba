//! Leases: persisted ownership and progress records for feed ranges.
//!
//! A lease binds one [`FeedRange`] to its consumption progress (the
//! continuation token) and to the worker currently draining it. The lease
//! store is the single source of truth for ownership; every mutation is
//! guarded by the lease's `version`, and a version mismatch surfaces as
//! [`FeedError::LeaseConflict`](crate::error::FeedError::LeaseConflict).
//!
//! # Available Implementations
//!
//! - [`InMemoryLeaseManager`]: in-process store for tests (enabled with the
//!   `test-utilities` feature or in unit tests)

#[cfg(any(test, feature = "test-utilities"))]
pub mod memory;
mod traits;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::continuation::FeedRangeContinuation;
use crate::error::FeedResult;
use crate::types::FeedRange;

#[cfg(any(test, feature = "test-utilities"))]
pub use memory::InMemoryLeaseManager;
pub use traits::LeaseManager;

/// Persisted ownership record for one feed range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Unique token within the store, derived from the feed range.
    pub lease_token: String,
    /// Slice of the change log this lease covers.
    pub feed_range: FeedRange,
    /// Consumption position; see [`FeedRangeContinuation`].
    pub continuation_token: String,
    /// Worker currently holding the lease.
    pub owner: Option<String>,
    /// Concurrency token, bumped by the store on every successful write.
    pub version: u64,
    /// Free-form user properties carried across splits.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Time of the last successful write.
    pub timestamp: DateTime<Utc>,
}

impl Lease {
    /// New, unowned lease for `feed_range` seeded with `continuation_token`.
    pub fn new(feed_range: FeedRange, continuation_token: impl Into<String>) -> Self {
        Self {
            lease_token: feed_range.lease_key(),
            feed_range,
            continuation_token: continuation_token.into(),
            owner: None,
            version: 0,
            properties: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Returns true if the lease is addressed by physical partition id.
    pub fn is_partition_addressed(&self) -> bool {
        self.feed_range.is_partition_addressed()
    }

    /// Returns true if `owner` currently holds this lease.
    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owner.as_deref() == Some(owner)
    }

    /// Decode the continuation token against this lease's range.
    pub fn continuation(&self) -> FeedResult<FeedRangeContinuation> {
        FeedRangeContinuation::from_token(&self.continuation_token, self.feed_range.epk_range())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EpkRange;

    #[test]
    fn test_new_lease_derives_token_from_range() {
        let range = EpkRange::new("00", "80").unwrap();
        let lease = Lease::new(FeedRange::epk(range.clone()), "");
        assert_eq!(lease.lease_token, "00-80");
        assert_eq!(lease.version, 0);
        assert!(lease.owner.is_none());
        assert!(!lease.is_partition_addressed());

        let lease = Lease::new(FeedRange::partition("7", range), "");
        assert_eq!(lease.lease_token, "7");
        assert!(lease.is_partition_addressed());
    }

    #[test]
    fn test_continuation_decodes_against_lease_range() {
        let range = EpkRange::new("00", "80").unwrap();
        let lease = Lease::new(FeedRange::partition("7", range.clone()), "etag-5");
        let continuation = lease.continuation().unwrap();
        assert_eq!(continuation.range(), &range);
        assert_eq!(continuation.cursor(), Some("etag-5"));
    }
}
