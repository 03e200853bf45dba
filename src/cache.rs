//! Single-flight async memoization.
//!
//! [`AsyncCache`] maps a key to a value that is expensive to build (a
//! throughput group controller, for example). Concurrent callers asking for
//! the same missing key share one in-flight construction: the factory runs
//! once and every waiter receives its result. A failed construction is not
//! cached, so the next caller starts a fresh attempt.
//!
//! Built on `moka::future::Cache::try_get_with`, which coalesces concurrent
//! initializations and hands the same `Arc<E>` to every waiter on failure.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use moka::future::Cache;
use tracing::debug;

use crate::metrics;

/// Keyed async cache with single-flight initialization.
pub struct AsyncCache<K, V> {
    inner: Cache<K, V>,
}

impl<K, V> AsyncCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Cache::new(capacity),
        }
    }

    /// Return the cached value for `key`, building it with `factory` if absent.
    ///
    /// If the cached value equals `obsolete`, it is discarded and rebuilt.
    /// Concurrent callers for the same key await a single factory call.
    pub async fn get_or_init<F, Fut, E>(
        &self,
        key: K,
        obsolete: Option<&V>,
        factory: F,
    ) -> Result<V, Arc<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Send + Sync + 'static,
    {
        if let Some(value) = self.inner.get(&key).await {
            match obsolete {
                Some(stale) if *stale == value => {
                    debug!(key = ?key, "Discarding obsolete cache entry");
                    self.inner.invalidate(&key).await;
                }
                _ => {
                    metrics::CACHE_OPERATIONS.with_label_values(&["hit"]).inc();
                    return Ok(value);
                }
            }
        }

        let result = self
            .inner
            .try_get_with(key.clone(), async move { factory().await })
            .await;

        let label = if result.is_ok() { "miss" } else { "error" };
        metrics::CACHE_OPERATIONS.with_label_values(&[label]).inc();
        if result.is_err() {
            debug!(key = ?key, "Cache initialization failed");
        }
        result
    }

    /// Return the cached value for `key` without building it.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key).await
    }

    /// Remove the entry for `key`, returning it if present.
    pub async fn remove(&self, key: &K) -> Option<V> {
        self.inner.remove(key).await
    }

    /// Remove all entries.
    pub async fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
    }

    /// Number of cached entries.
    pub async fn len(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    struct BuildError(&'static str);

    #[tokio::test]
    async fn test_concurrent_callers_share_one_construction() {
        let cache: Arc<AsyncCache<String, Arc<String>>> = Arc::new(AsyncCache::new(16));
        let calls = Arc::new(AtomicUsize::new(0));

        let waiters = (0..8).map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            async move {
                cache
                    .get_or_init("group-a".to_string(), None, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, BuildError>(Arc::new("controller".to_string()))
                    })
                    .await
            }
        });
        let results = futures::future::join_all(waiters).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first = results[0].as_ref().unwrap().clone();
        for result in &results {
            assert!(Arc::ptr_eq(result.as_ref().unwrap(), &first));
        }
    }

    #[tokio::test]
    async fn test_failure_is_shared_and_not_cached() {
        let cache: Arc<AsyncCache<String, u32>> = Arc::new(AsyncCache::new(16));
        let calls = Arc::new(AtomicUsize::new(0));

        let waiters = (0..4).map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            async move {
                cache
                    .get_or_init("k".to_string(), None, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err::<u32, _>(BuildError("store unavailable"))
                    })
                    .await
            }
        });
        let results = futures::future::join_all(waiters).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first = results[0].as_ref().unwrap_err().clone();
        for result in &results {
            let err = result.as_ref().unwrap_err();
            assert!(Arc::ptr_eq(err, &first));
            assert_eq!(**err, BuildError("store unavailable"));
        }

        // A later caller retries instead of seeing the old failure.
        let value = cache
            .get_or_init("k".to_string(), None, || async { Ok::<_, BuildError>(5) })
            .await
            .unwrap();
        assert_eq!(value, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hit_skips_factory() {
        let cache: AsyncCache<&'static str, u32> = AsyncCache::new(16);
        cache
            .get_or_init("k", None, || async { Ok::<_, BuildError>(1) })
            .await
            .unwrap();

        let value = cache
            .get_or_init("k", None, || async { Err::<u32, _>(BuildError("unused")) })
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn test_obsolete_value_is_rebuilt() {
        let cache: AsyncCache<&'static str, u32> = AsyncCache::new(16);
        cache
            .get_or_init("k", None, || async { Ok::<_, BuildError>(1) })
            .await
            .unwrap();

        // Obsolete value that no longer matches the entry is ignored.
        let value = cache
            .get_or_init("k", Some(&9), || async { Ok::<_, BuildError>(2) })
            .await
            .unwrap();
        assert_eq!(value, 1);

        let value = cache
            .get_or_init("k", Some(&1), || async { Ok::<_, BuildError>(2) })
            .await
            .unwrap();
        assert_eq!(value, 2);
        assert_eq!(cache.get(&"k").await, Some(2));
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let cache: AsyncCache<u32, u32> = AsyncCache::new(16);
        for i in 0..3 {
            cache
                .get_or_init(i, None, move || async move { Ok::<_, BuildError>(i * 10) })
                .await
                .unwrap();
        }
        assert_eq!(cache.len().await, 3);

        assert_eq!(cache.remove(&1).await, Some(10));
        assert_eq!(cache.remove(&1).await, None);
        assert_eq!(cache.len().await, 2);

        cache.clear().await;
        assert!(cache.is_empty().await);
    }
}
