//! Testing utilities for the advisor.
//!
//! Provides a scriptable in-process [`StatusStore`] and small helpers
//! for eventually-style assertions. Useful both for this crate's own
//! tests and for consumers testing their wiring without a live Redis
//! or ZooKeeper.


use crate::error::{Result, StorageError};
use crate::status::Status;
use crate::storage::StatusStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Poll an async condition until it holds or the timeout expires.
pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// A scriptable [`StatusStore`] for tests.
///
/// Fetches return whatever peer set was last scripted with
/// [`set_peers`](MockStore::set_peers); publishes are recorded and can
/// be inspected with [`published`](MockStore::published). Either
/// operation can be made to fail.
#[derive(Default)]
pub struct MockStore {
    self_name: String,
    peers: Mutex<Vec<Status>>,
    published: Mutex<Vec<Status>>,
    fail_fetches: AtomicBool,
    fail_publishes: AtomicBool,
    stopped: AtomicBool,
    ready_calls: Mutex<u32>,
}

impl MockStore {
    /// Create a mock store publishing under the given identity.
    pub fn new(self_name: impl Into<String>) -> Self {
        Self {
            self_name: self_name.into(),
            ..Default::default()
        }
    }

    /// Make every fetch fail with a stopped-backend error.
    pub fn failing_fetches(self) -> Self {
        self.fail_fetches.store(true, Ordering::SeqCst);
        self
    }

    /// Make every publish fail with a stopped-backend error.
    pub fn failing_publishes(self) -> Self {
        self.fail_publishes.store(true, Ordering::SeqCst);
        self
    }

    /// Script the peer set returned by subsequent fetches.
    pub fn set_peers(&self, peers: Vec<Status>) {
        *self.peers.lock() = peers;
    }

    /// Everything published so far, oldest first.
    pub fn published(&self) -> Vec<Status> {
        self.published.lock().clone()
    }

    /// How many times `ready` was awaited.
    pub fn ready_calls(&self) -> u32 {
        *self.ready_calls.lock()
    }

    /// Whether `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusStore for MockStore {
    async fn ready(&self) -> Result<()> {
        *self.ready_calls.lock() += 1;
        Ok(())
    }

    async fn publish_self_status(&self, status: Status) -> Result<Status> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(StorageError::Stopped.into());
        }
        self.published.lock().push(status.clone());
        Ok(status)
    }

    async fn get_peer_statuses(&self) -> Result<Vec<Status>> {
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(StorageError::Stopped.into());
        }
        Ok(self.peers.lock().clone())
    }

    async fn stop(&self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn self_name(&self) -> &str {
        &self.self_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_store_records_publishes() {
        let store = MockStore::new("m");
        store
            .publish_self_status(Status::new(1.0, "m", "m.test"))
            .await
            .unwrap();
        store
            .publish_self_status(Status::new(2.0, "m", "m.test"))
            .await
            .unwrap();

        let published = store.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].value, 2.0);
    }

    #[tokio::test]
    async fn test_mock_store_scripted_peers_and_failures() {
        let store = MockStore::new("m");
        store.set_peers(vec![Status::new(5.0, "p", "p.test")]);
        assert_eq!(store.get_peer_statuses().await.unwrap().len(), 1);

        let store = MockStore::new("m").failing_fetches();
        assert!(store.get_peer_statuses().await.is_err());

        let store = MockStore::new("m").failing_publishes();
        assert!(store
            .publish_self_status(Status::new(1.0, "m", "m.test"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        assert!(!wait_for(|| async { false }, Duration::from_millis(50)).await);
        assert!(wait_for(|| async { true }, Duration::from_secs(1)).await);
    }
}
