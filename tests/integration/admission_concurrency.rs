//! Admission controller behavior under contention, against both lease stores

use super::test_utils::fast_admission;
use examgen::admission::{LeaseStore, MemoryLeaseStore, SledLeaseStore};
use examgen::error::AdmissionError;
use examgen::types::JobId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn hammer(store: Arc<dyn LeaseStore>, capacity: usize, jobs: usize) -> usize {
    let controller = fast_admission(store, capacity, Duration::from_secs(5));
    let holding = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..jobs {
        let controller = controller.clone();
        let holding = holding.clone();
        let peak = peak.clone();
        handles.push(tokio::spawn(async move {
            let guard = controller.acquire(JobId::new()).await.unwrap();
            let now = holding.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(15)).await;
            holding.fetch_sub(1, Ordering::SeqCst);
            guard.release().unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(controller.outstanding().unwrap(), 0);
    peak.load(Ordering::SeqCst)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_store_bounds_concurrent_holders() {
    let peak = hammer(Arc::new(MemoryLeaseStore::new()), 3, 12).await;
    assert!(peak <= 3, "peak {} exceeded capacity", peak);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sled_store_bounds_concurrent_holders() {
    let temp_dir = TempDir::new().unwrap();
    let db = sled::open(temp_dir.path().join("db")).unwrap();
    let peak = hammer(Arc::new(SledLeaseStore::new(&db).unwrap()), 2, 8).await;
    assert!(peak <= 2, "peak {} exceeded capacity", peak);
}

#[tokio::test]
async fn test_two_controllers_share_one_sled_store() {
    let temp_dir = TempDir::new().unwrap();
    let db = sled::open(temp_dir.path().join("db")).unwrap();
    let first = fast_admission(
        Arc::new(SledLeaseStore::new(&db).unwrap()),
        1,
        Duration::from_millis(60),
    );
    let second = fast_admission(
        Arc::new(SledLeaseStore::new(&db).unwrap()),
        1,
        Duration::from_millis(60),
    );

    let held = first.acquire(JobId::new()).await.unwrap();
    let err = second.acquire(JobId::new()).await.unwrap_err();
    assert!(matches!(err, AdmissionError::Timeout { capacity: 1, .. }));

    drop(held);
    let guard = second.acquire(JobId::new()).await.unwrap();
    assert_eq!(first.outstanding().unwrap(), 1);
    guard.release().unwrap();
}

async fn abandoned_lease_expires(store: Arc<dyn LeaseStore>) {
    let controller = fast_admission(store.clone(), 1, Duration::from_millis(500))
        .with_lease_ttl(Duration::from_millis(50));

    let abandoned = controller.acquire(JobId::new()).await.unwrap();
    std::mem::forget(abandoned);
    assert_eq!(controller.outstanding().unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(store.outstanding().unwrap(), 0);

    let guard = controller.acquire(JobId::new()).await.unwrap();
    assert_eq!(controller.outstanding().unwrap(), 1);
    guard.release().unwrap();
    assert_eq!(store.outstanding().unwrap(), 0);
}

#[tokio::test]
async fn test_abandoned_lease_expires_and_frees_capacity() {
    abandoned_lease_expires(Arc::new(MemoryLeaseStore::new())).await;
}

#[tokio::test]
async fn test_abandoned_sled_lease_expires_and_frees_capacity() {
    let temp_dir = TempDir::new().unwrap();
    let db = sled::open(temp_dir.path().join("db")).unwrap();
    abandoned_lease_expires(Arc::new(SledLeaseStore::new(&db).unwrap())).await;
}

#[tokio::test]
async fn test_dropped_guard_releases_on_error_path() {
    let controller = fast_admission(
        Arc::new(MemoryLeaseStore::new()),
        1,
        Duration::from_millis(50),
    );

    let result: Result<(), &str> = async {
        let _guard = controller.acquire(JobId::new()).await.unwrap();
        Err("service failed")
    }
    .await;

    assert!(result.is_err());
    assert_eq!(controller.outstanding().unwrap(), 0);
}
