//! In-memory lease store for testing.
//!
//! Cloning an [`InMemoryLeaseManager`] shares the underlying store, which lets
//! tests simulate several workers racing on the same leases.
//!
//! # Usage
//!
//! This module is available when the `test-utilities` feature is enabled,
//! or during unit tests:
//!
//! ```toml
//! [dev-dependencies]
//! feedlease = { path = ".", features = ["test-utilities"] }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use super::{Lease, LeaseManager};
use crate::error::{FeedError, FeedResult};
use crate::types::FeedRange;

#[derive(Debug, Clone, Default)]
pub struct InMemoryLeaseManager {
    /// Shared lease records keyed by lease token.
    pub leases: Arc<RwLock<HashMap<String, Lease>>>,
    /// Number of leases actually inserted by `create_lease_if_not_exist`.
    pub created: Arc<AtomicUsize>,
    /// Remaining inserts before creation starts failing transiently.
    create_budget: Arc<Mutex<Option<usize>>>,
    /// Remaining checkpoints that fail transiently before succeeding.
    checkpoint_failures: Arc<AtomicUsize>,
}

impl InMemoryLeaseManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a lease verbatim, replacing any existing record.
    pub async fn insert(&self, lease: Lease) {
        self.leases
            .write()
            .await
            .insert(lease.lease_token.clone(), lease);
    }

    /// Number of leases in the store.
    pub async fn lease_count(&self) -> usize {
        self.leases.read().await.len()
    }

    /// Let the next `successes` inserts through, then fail every further
    /// insert with a transient error. `None` clears the limit.
    pub async fn fail_creates_after(&self, successes: Option<usize>) {
        *self.create_budget.lock().await = successes;
    }

    /// Fail the next `count` checkpoints with a transient error.
    pub fn fail_next_checkpoints(&self, count: usize) {
        self.checkpoint_failures.store(count, Ordering::SeqCst);
    }

    /// Conditional replace shared by every version-guarded update.
    async fn replace<F>(&self, lease: &Lease, require_owner: bool, mutate: F) -> FeedResult<Lease>
    where
        F: FnOnce(&mut Lease),
    {
        let mut leases = self.leases.write().await;
        let stored = leases
            .get_mut(&lease.lease_token)
            .ok_or_else(|| FeedError::not_found(&lease.lease_token))?;

        if stored.version != lease.version || (require_owner && stored.owner != lease.owner) {
            return Err(FeedError::conflict(&lease.lease_token));
        }

        mutate(stored);
        stored.version += 1;
        stored.timestamp = Utc::now();
        Ok(stored.clone())
    }
}

#[async_trait]
impl LeaseManager for InMemoryLeaseManager {
    async fn create_lease_if_not_exist(
        &self,
        range: &FeedRange,
        seed_continuation: &str,
    ) -> FeedResult<Lease> {
        let mut leases = self.leases.write().await;
        let key = range.lease_key();
        if let Some(existing) = leases.get(&key) {
            return Ok(existing.clone());
        }

        {
            let mut budget = self.create_budget.lock().await;
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    return Err(FeedError::TransientStore(format!(
                        "injected create failure for {key}"
                    )));
                }
                *remaining -= 1;
            }
        }

        let lease = Lease::new(range.clone(), seed_continuation);
        leases.insert(key, lease.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(lease)
    }

    async fn delete(&self, lease: &Lease) -> FeedResult<()> {
        self.leases.write().await.remove(&lease.lease_token);
        Ok(())
    }

    async fn get(&self, lease_token: &str) -> FeedResult<Option<Lease>> {
        Ok(self.leases.read().await.get(lease_token).cloned())
    }

    async fn list_all(&self) -> FeedResult<Vec<Lease>> {
        let mut all: Vec<Lease> = self.leases.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.lease_token.cmp(&b.lease_token));
        Ok(all)
    }

    async fn acquire(&self, lease: &Lease, owner: &str) -> FeedResult<Lease> {
        self.replace(lease, false, |stored| {
            stored.owner = Some(owner.to_string());
        })
        .await
    }

    async fn renew(&self, lease: &Lease) -> FeedResult<Lease> {
        self.replace(lease, true, |_| {}).await
    }

    async fn release(&self, lease: &Lease) -> FeedResult<Lease> {
        self.replace(lease, true, |stored| stored.owner = None).await
    }

    async fn checkpoint(&self, lease: &Lease, continuation_token: &str) -> FeedResult<Lease> {
        let pending = self.checkpoint_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.checkpoint_failures.store(pending - 1, Ordering::SeqCst);
            return Err(FeedError::TransientStore(format!(
                "injected checkpoint failure for {}",
                lease.lease_token
            )));
        }

        self.replace(lease, true, |stored| {
            stored.continuation_token = continuation_token.to_string();
        })
        .await
    }

    async fn update_properties(&self, lease: &Lease) -> FeedResult<Lease> {
        let properties = lease.properties.clone();
        self.replace(lease, false, |stored| stored.properties = properties)
            .await
    }
}
