//! In-process storage backend.
//!
//! Backs tests, examples and single-process simulations. Records live
//! in a map shared by every store handed out by one [`MemoryCluster`];
//! registration and removal are immediate, there is no expiry and no
//! miss tolerance. Records still pass through the shared wire format so
//! the codec is exercised the same way the production backends do.

use crate::error::{Result, StorageError};
use crate::status::Status;
use crate::storage::StatusStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// A shared in-process namespace that [`MemoryStore`]s publish into.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    records: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryCluster {
    /// Create an empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with a generated instance name.
    pub fn store(&self) -> MemoryStore {
        self.store_named(Uuid::new_v4().to_string())
    }

    /// Create a store with the given instance name.
    pub fn store_named(&self, self_name: impl Into<String>) -> MemoryStore {
        MemoryStore {
            self_name: self_name.into(),
            records: self.records.clone(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Number of currently registered instances.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether no instance is registered.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

/// In-process [`StatusStore`] handed out by a [`MemoryCluster`].
pub struct MemoryStore {
    self_name: String,
    records: Arc<Mutex<BTreeMap<String, String>>>,
    stopped: AtomicBool,
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn ready(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(StorageError::Stopped.into());
        }
        Ok(())
    }

    async fn publish_self_status(&self, status: Status) -> Result<Status> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(StorageError::Stopped.into());
        }
        let payload = status.serialize()?;
        self.records.lock().insert(self.self_name.clone(), payload);
        Ok(status)
    }

    async fn get_peer_statuses(&self) -> Result<Vec<Status>> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(StorageError::Stopped.into());
        }
        let records = self.records.lock().clone();
        let mut statuses = Vec::with_capacity(records.len());
        for (name, payload) in records {
            if name == self.self_name {
                continue;
            }
            match Status::deserialize(&payload) {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    warn!(peer = %name, error = %e, "Dropping corrupt peer record");
                }
            }
        }
        Ok(statuses)
    }

    async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.records.lock().remove(&self.self_name);
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
    async fn test_publish_and_fetch_between_peers() {
        let cluster = MemoryCluster::new();
        let a = cluster.store_named("a");
        let b = cluster.store_named("b");

        a.publish_self_status(Status::new(10.0, "a", "a.test"))
            .await
            .unwrap();
        b.publish_self_status(Status::new(20.0, "b", "b.test"))
            .await
            .unwrap();

        let peers = a.get_peer_statuses().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].name, "b");
        assert_eq!(peers[0].value, 20.0);

        let peers = b.get_peer_statuses().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].name, "a");
    }

    #[tokio::test]
    async fn test_publish_overwrites_previous_value() {
        let cluster = MemoryCluster::new();
        let a = cluster.store_named("a");
        let b = cluster.store_named("b");

        a.publish_self_status(Status::new(10.0, "a", "a.test"))
            .await
            .unwrap();
        a.publish_self_status(Status::new(15.0, "a", "a.test"))
            .await
            .unwrap();

        let peers = b.get_peer_statuses().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].value, 15.0);
    }

    #[tokio::test]
    async fn test_stop_removes_instance_from_peers_view() {
        let cluster = MemoryCluster::new();
        let a = cluster.store_named("a");
        let b = cluster.store_named("b");

        a.publish_self_status(Status::new(10.0, "a", "a.test"))
            .await
            .unwrap();
        b.publish_self_status(Status::new(20.0, "b", "b.test"))
            .await
            .unwrap();

        b.stop().await.unwrap();
        let peers = a.get_peer_statuses().await.unwrap();
        assert!(peers.is_empty());

        // idempotent
        b.stop().await.unwrap();
        assert!(b.publish_self_status(Status::new(1.0, "b", "b.test"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_clusters_are_isolated() {
        let one = MemoryCluster::new();
        let two = MemoryCluster::new();

        one.store_named("a")
            .publish_self_status(Status::new(1.0, "a", "a.test"))
            .await
            .unwrap();

        let peers = two.store_named("b").get_peer_statuses().await.unwrap();
        assert!(peers.is_empty());
    }

    #[tokio::test]
    async fn test_generated_names_are_unique() {
        let cluster = MemoryCluster::new();
        let a = cluster.store();
        let b = cluster.store();
        assert_ne!(a.self_name(), b.self_name());
    }
}
