//! Integration tests for lease ownership through the LeaseManager trait.

use feedlease::prelude::*;
use std::sync::Arc;

fn store() -> Arc<dyn LeaseManager> {
    Arc::new(InMemoryLeaseManager::new())
}

fn range(min: &str, max: &str) -> FeedRange {
    FeedRange::epk(EpkRange::new(min, max).unwrap())
}

#[tokio::test]
async fn test_acquire_renew_release_cycle() {
    let store = store();
    let lease = store.create_lease_if_not_exist(&range("", "80"), "").await.unwrap();
    assert_eq!(lease.owner, None);

    let held = store.acquire(&lease, "worker-a").await.unwrap();
    assert!(held.is_owned_by("worker-a"));
    assert!(held.version > lease.version);
    assert!(store.is_still_held(&held).await.unwrap());

    let renewed = store.renew(&held).await.unwrap();
    assert!(renewed.version > held.version);
    assert!(!store.is_still_held(&held).await.unwrap());

    let released = store.release(&renewed).await.unwrap();
    assert_eq!(released.owner, None);
}

#[tokio::test]
async fn test_takeover_fences_previous_owner() {
    let store = store();
    let lease = store.create_lease_if_not_exist(&range("80", "FF"), "").await.unwrap();
    let a = store.acquire(&lease, "worker-a").await.unwrap();

    // Worker B reads the current record and claims it.
    let current = store.get(&a.lease_token).await.unwrap().unwrap();
    let b = store.acquire(&current, "worker-b").await.unwrap();
    assert!(b.is_owned_by("worker-b"));

    let err = store.checkpoint(&a, "stale").await.unwrap_err();
    assert!(err.is_lease_lost());
    assert!(matches!(err, FeedError::LeaseConflict { .. }));

    let err = store.renew(&a).await.unwrap_err();
    assert!(err.is_lease_lost());

    let checkpointed = store.checkpoint(&b, "fresh").await.unwrap();
    assert_eq!(checkpointed.continuation_token, "fresh");
}

#[tokio::test]
async fn test_deleted_lease_reports_not_found() {
    let store = store();
    let lease = store.create_lease_if_not_exist(&range("", "FF"), "").await.unwrap();
    let held = store.acquire(&lease, "worker-a").await.unwrap();

    store.delete(&held).await.unwrap();
    store.delete(&held).await.unwrap();

    let err = store.checkpoint(&held, "late").await.unwrap_err();
    assert!(matches!(err, FeedError::LeaseNotFound { .. }));
    assert!(!store.is_still_held(&held).await.unwrap());
}

#[tokio::test]
async fn test_concurrent_creation_yields_single_lease() {
    let store = store();
    let feed_range = range("40", "C0");

    let mut tasks = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        let feed_range = feed_range.clone();
        tasks.push(tokio::spawn(async move {
            store
                .create_lease_if_not_exist(&feed_range, &format!("seed-{i}"))
                .await
                .unwrap()
        }));
    }

    let mut tokens = Vec::new();
    for task in tasks {
        tokens.push(task.await.unwrap().continuation_token);
    }
    assert!(tokens.windows(2).all(|w| w[0] == w[1]));

    let all = store.list_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].lease_token, "40-C0");
}

#[tokio::test]
async fn test_properties_survive_updates() {
    let store = store();
    let lease = store.create_lease_if_not_exist(&range("", "FF"), "").await.unwrap();
    let mut held = store.acquire(&lease, "worker-a").await.unwrap();

    held.properties.insert("tenant".to_string(), "blue".to_string());
    let updated = store.update_properties(&held).await.unwrap();
    let checkpointed = store.checkpoint(&updated, "c1").await.unwrap();

    assert_eq!(checkpointed.properties.get("tenant").map(String::as_str), Some("blue"));
}
