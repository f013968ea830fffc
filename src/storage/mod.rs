//! Shared-storage abstraction for publishing and reading peer statuses.
//!
//! The advisor only ever talks to the [`StatusStore`] trait; which
//! durability model sits behind it is a deployment choice.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Advisor                                  │
//! │                                                                  │
//! │   store: Arc<dyn StatusStore>                                   │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     StatusStore Trait                            │
//! └─────────────────────────────────────────────────────────────────┘
//!           │                    │                    │
//!           ▼                    ▼                    ▼
//! ┌──────────────┐    ┌──────────────────┐    ┌──────────────────┐
//! │ RedisStore   │    │ ZookeeperStore   │    │ MemoryStore      │
//! │ (TTL records)│    │ (ephemeral nodes)│    │ (in-process)     │
//! └──────────────┘    └──────────────────┘    └──────────────────┘
//! ```
//!
//! The two production backends differ in how liveness is detected: the
//! Redis backend lets records expire and prunes peers after repeated
//! read misses, while ZooKeeper removes a peer's ephemeral node the
//! moment its session ends. Both present the same contract: a fetch
//! returns every currently discoverable peer and nothing else —
//! transient misses shorten the list, they never surface as errors or
//! placeholder entries.

pub mod memory;
pub mod redis;
pub mod zookeeper;

pub use memory::{MemoryCluster, MemoryStore};
pub use self::redis::{RedisStore, RedisStoreConfig};
pub use self::zookeeper::{ZookeeperStore, ZookeeperStoreConfig};

use crate::error::Result;
use crate::status::Status;
use async_trait::async_trait;
use std::sync::Arc;

/// Contract every storage backend satisfies.
///
/// A store is constructed for one cluster namespace and one instance
/// identity, and exclusively owns its connection/session: it is created
/// lazily on first use and torn down exactly once by [`stop`].
///
/// [`stop`]: StatusStore::stop
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Resolves once reads and writes are safe to attempt.
    ///
    /// Safe to await any number of times; later calls are cheap.
    async fn ready(&self) -> Result<()>;

    /// Make `status` visible to peers under this instance's identity,
    /// replacing any previously published value.
    async fn publish_self_status(&self, status: Status) -> Result<Status>;

    /// Every currently discoverable peer's most recent status,
    /// excluding this instance.
    ///
    /// Entries that cannot currently be resolved are omitted; the
    /// returned list never contains placeholders.
    async fn get_peer_statuses(&self) -> Result<Vec<Status>>;

    /// Remove this instance from the shared namespace and release the
    /// connection. Idempotent.
    async fn stop(&self) -> Result<()>;

    /// The instance identity this store publishes under.
    fn self_name(&self) -> &str;
}

/// Backend selection for [`Advisor::new`](crate::Advisor::new).
#[derive(Clone)]
pub enum StorageConfig {
    /// TTL-record backend over Redis.
    Redis(RedisStoreConfig),

    /// Ephemeral-node backend over ZooKeeper.
    Zookeeper(ZookeeperStoreConfig),

    /// A pre-built backend supplied by the caller.
    Custom(Arc<dyn StatusStore>),
}

impl StorageConfig {
    pub(crate) fn build(
        self,
        cluster_name: &str,
        self_name: Option<String>,
    ) -> Result<Arc<dyn StatusStore>> {
        match self {
            StorageConfig::Redis(config) => {
                Ok(Arc::new(RedisStore::new(config, cluster_name, self_name)?))
            }
            StorageConfig::Zookeeper(config) => Ok(Arc::new(ZookeeperStore::new(
                config,
                cluster_name,
                self_name,
            ))),
            StorageConfig::Custom(store) => Ok(store),
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageConfig::Redis(config) => f.debug_tuple("Redis").field(config).finish(),
            StorageConfig::Zookeeper(config) => f.debug_tuple("Zookeeper").field(config).finish(),
            StorageConfig::Custom(store) => {
                f.debug_tuple("Custom").field(&store.self_name()).finish()
            }
        }
    }
}
