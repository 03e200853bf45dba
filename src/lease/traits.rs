//! Lease store abstraction.
//!
//! [`LeaseManager`] is the only component that talks to persistent storage.
//! Implementations must enforce optimistic concurrency: every replace is
//! conditional on the caller's copy carrying the stored `version`.

use async_trait::async_trait;

use super::Lease;
use crate::error::FeedResult;
use crate::types::FeedRange;

/// CRUD operations over the lease store.
///
/// Every method is a suspension point. Methods that replace a lease return
/// the stored copy with its new `version`; callers must continue with that
/// copy.
#[async_trait]
pub trait LeaseManager: Send + Sync {
    // ========================================================================
    // Creation / Deletion
    // ========================================================================

    /// Create a lease for `range` unless one already exists.
    ///
    /// Leases are matched by [`FeedRange::lease_key`], not by identity. An
    /// existing lease is returned unchanged; otherwise a new lease is
    /// persisted with `continuation_token = seed_continuation`. Safe to call
    /// concurrently and repeatedly.
    async fn create_lease_if_not_exist(
        &self,
        range: &FeedRange,
        seed_continuation: &str,
    ) -> FeedResult<Lease>;

    /// Remove a lease. Deleting a lease that is already gone is a no-op.
    async fn delete(&self, lease: &Lease) -> FeedResult<()>;

    // ========================================================================
    // Reads
    // ========================================================================

    /// Look up a lease by token.
    async fn get(&self, lease_token: &str) -> FeedResult<Option<Lease>>;

    /// All leases in the store.
    async fn list_all(&self) -> FeedResult<Vec<Lease>>;

    // ========================================================================
    // Version-guarded updates
    // ========================================================================

    /// Claim `lease` for `owner`.
    ///
    /// Fails with `LeaseConflict` if the stored version differs.
    async fn acquire(&self, lease: &Lease, owner: &str) -> FeedResult<Lease>;

    /// Refresh the lease timestamp; the owner must still match.
    async fn renew(&self, lease: &Lease) -> FeedResult<Lease>;

    /// Give up ownership of `lease`.
    async fn release(&self, lease: &Lease) -> FeedResult<Lease>;

    /// Persist a new continuation token; the owner must still match.
    async fn checkpoint(&self, lease: &Lease, continuation_token: &str) -> FeedResult<Lease>;

    /// Persist `lease.properties`.
    async fn update_properties(&self, lease: &Lease) -> FeedResult<Lease>;

    // ========================================================================
    // Ownership checks
    // ========================================================================

    /// Returns true if the stored lease still has the caller's version and
    /// owner.
    ///
    /// Multi-step operations call this between steps and abort once it
    /// returns false.
    async fn is_still_held(&self, lease: &Lease) -> FeedResult<bool> {
        Ok(self
            .get(&lease.lease_token)
            .await?
            .is_some_and(|stored| stored.version == lease.version && stored.owner == lease.owner))
    }
}
