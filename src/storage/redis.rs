//! TTL-record storage backend over Redis.
//!
//! Layout per cluster: one non-expiring hash `loadvisor:{cluster}`
//! mapping instance name to that instance's record key, plus one
//! expiring record `loadvisor:{cluster}_{name}` per instance holding
//! the serialized status. Publishing refreshes the record's TTL; a
//! record that expires reads as absent.
//!
//! Absence is not immediately treated as departure. Each peer key
//! carries a consecutive-miss counter so a single missed refresh (for
//! example a slow publish cycle) does not evict a live peer; only after
//! more than two consecutive misses is the peer pruned from the
//! mapping.

use crate::error::{Error, Result, StorageError};
use crate::status::Status;
use crate::storage::StatusStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;

const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(60);
const MAX_CONSECUTIVE_MISSES: u32 = 2;

/// Configuration for [`RedisStore`].
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL, e.g. `redis://127.0.0.1:6379`.
    /// Ignored when `client` is supplied.
    pub url: String,

    /// A pre-built client to use instead of opening `url`.
    pub client: Option<redis::Client>,

    /// Expiry applied to this instance's status record, refreshed on
    /// every publish.
    pub status_ttl: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".into(),
            client: None,
            status_ttl: DEFAULT_STATUS_TTL,
        }
    }
}

impl RedisStoreConfig {
    /// Create a configuration for the given connection URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Use a pre-built client instead of opening the URL.
    pub fn with_client(mut self, client: redis::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the status record expiry.
    pub fn with_status_ttl(mut self, ttl: Duration) -> Self {
        self.status_ttl = ttl;
        self
    }
}

/// TTL-record [`StatusStore`] over Redis.
pub struct RedisStore {
    self_name: String,
    cluster_key: String,
    self_key: String,
    status_ttl: Duration,
    client: redis::Client,
    conn: OnceCell<MultiplexedConnection>,
    /// Consecutive read misses per peer record key; cleared on a hit or
    /// on eviction.
    failed_gets: Mutex<HashMap<String, u32>>,
    stopped: AtomicBool,
}

impl RedisStore {
    /// Create a store for the given cluster namespace.
    ///
    /// The instance name is generated when not supplied. No connection
    /// is opened yet; that happens lazily on first use.
    pub fn new(
        config: RedisStoreConfig,
        cluster_name: impl Into<String>,
        self_name: Option<String>,
    ) -> Result<Self> {
        let self_name = self_name.unwrap_or_else(|| Uuid::new_v4().to_string());
        let cluster_key = format!("loadvisor:{}", cluster_name.into());
        let self_key = format!("{cluster_key}_{self_name}");
        let client = match config.client {
            Some(client) => client,
            None => redis::Client::open(config.url.as_str()).map_err(StorageError::Redis)?,
        };
        Ok(Self {
            self_name,
            cluster_key,
            self_key,
            status_ttl: config.status_ttl,
            client,
            conn: OnceCell::new(),
            failed_gets: Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(StorageError::Stopped.into());
        }
        let conn = self
            .conn
            .get_or_try_init(|| self.client.get_multiplexed_async_connection())
            .await
            .map_err(StorageError::Redis)?;
        Ok(conn.clone())
    }

    /// Record a miss for `peer_key`. Returns true when the peer has now
    /// exceeded the miss tolerance and must be pruned from the mapping.
    fn record_miss(&self, peer_key: &str) -> bool {
        let mut failed = self.failed_gets.lock();
        let count = failed.entry(peer_key.to_string()).or_insert(0);
        *count += 1;
        if *count > MAX_CONSECUTIVE_MISSES {
            failed.remove(peer_key);
            true
        } else {
            false
        }
    }

    fn clear_miss(&self, peer_key: &str) {
        self.failed_gets.lock().remove(peer_key);
    }

    async fn remove_mapping_entry(&self, peer_name: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.hdel::<_, _, ()>(&self.cluster_key, peer_name)
            .await
            .map_err(StorageError::Redis)?;
        Ok(())
    }
}

#[async_trait]
impl StatusStore for RedisStore {
    async fn ready(&self) -> Result<()> {
        self.connection().await.map(|_| ())
    }

    async fn publish_self_status(&self, status: Status) -> Result<Status> {
        let payload = status.serialize()?;
        let ttl_secs = (self.status_ttl.as_millis().div_ceil(1_000) as u64).max(1);

        let mut map_conn = self.connection().await?;
        let mut record_conn = map_conn.clone();
        let (map_res, record_res) = tokio::join!(
            map_conn.hset::<_, _, _, ()>(&self.cluster_key, &self.self_name, &self.self_key),
            record_conn.set_ex::<_, _, ()>(&self.self_key, &payload, ttl_secs),
        );
        map_res.map_err(StorageError::Redis)?;
        record_res.map_err(StorageError::Redis)?;
        Ok(status)
    }

    async fn get_peer_statuses(&self) -> Result<Vec<Status>> {
        let mut conn = self.connection().await?;
        let mapping: HashMap<String, String> = conn
            .hgetall(&self.cluster_key)
            .await
            .map_err(StorageError::Redis)?;

        let peers: Vec<(String, String)> = mapping
            .into_iter()
            .filter(|(name, _)| name != &self.self_name)
            .collect();

        // Fan out the record reads; reassemble by index so the result
        // order is the mapping order, not completion order.
        let mut reads = JoinSet::new();
        for (idx, (_, peer_key)) in peers.iter().enumerate() {
            let mut conn = conn.clone();
            let peer_key = peer_key.clone();
            reads.spawn(async move {
                let raw: std::result::Result<Option<String>, redis::RedisError> =
                    conn.get(&peer_key).await;
                (idx, raw)
            });
        }

        let mut raw_records: Vec<Option<Option<String>>> = vec![None; peers.len()];
        while let Some(joined) = reads.join_next().await {
            let (idx, raw) = joined.map_err(|e| Error::Internal(e.to_string()))?;
            raw_records[idx] = Some(raw.map_err(StorageError::Redis)?);
        }

        let mut statuses = Vec::with_capacity(peers.len());
        let mut evict = Vec::new();
        for ((peer_name, peer_key), raw) in peers.iter().zip(raw_records) {
            match raw.flatten() {
                Some(raw) => {
                    self.clear_miss(peer_key);
                    match Status::deserialize(&raw) {
                        Ok(status) => statuses.push(status),
                        Err(e) => {
                            warn!(peer = %peer_name, error = %e, "Dropping corrupt peer record");
                        }
                    }
                }
                None => {
                    if self.record_miss(peer_key) {
                        debug!(peer = %peer_name, "Peer record expired repeatedly, pruning");
                        evict.push(peer_name.clone());
                    }
                }
            }
        }

        for peer_name in evict {
            if let Err(e) = self.remove_mapping_entry(&peer_name).await {
                warn!(peer = %peer_name, error = %e, "Failed to prune expired peer");
            }
        }

        Ok(statuses)
    }

    async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Best-effort removal of our mapping entry; the status record
        // expires on its own.
        if let Some(conn) = self.conn.get() {
            let mut conn = conn.clone();
            if let Err(e) = conn
                .hdel::<_, _, ()>(&self.cluster_key, &self.self_name)
                .await
            {
                warn!(error = %e, "Failed to remove self from cluster mapping");
            }
        }
        Ok(())
    }

    fn self_name(&self) -> &str {
        &self.self_name
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("self_name", &self.self_name)
            .field("cluster_key", &self.cluster_key)
            .field("status_ttl", &self.status_ttl)
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store(ttl: Duration) -> RedisStore {
        RedisStore::new(
            RedisStoreConfig::new("redis://127.0.0.1:6379").with_status_ttl(ttl),
            "test-cluster",
            Some("instance-1".into()),
        )
        .unwrap()
    }

    #[test]
    fn test_key_layout() {
        let store = test_store(DEFAULT_STATUS_TTL);
        assert_eq!(store.cluster_key, "loadvisor:test-cluster");
        assert_eq!(store.self_key, "loadvisor:test-cluster_instance-1");
        assert_eq!(store.self_name(), "instance-1");
    }

    #[test]
    fn test_generated_name_when_absent() {
        let a = RedisStore::new(RedisStoreConfig::default(), "c", None).unwrap();
        let b = RedisStore::new(RedisStoreConfig::default(), "c", None).unwrap();
        assert_ne!(a.self_name(), b.self_name());
        assert!(!a.self_name().is_empty());
    }

    #[test]
    fn test_miss_counter_tolerates_two_misses_then_evicts() {
        let store = test_store(DEFAULT_STATUS_TTL);

        assert!(!store.record_miss("peer-key"));
        assert!(!store.record_miss("peer-key"));
        // third consecutive miss crosses the tolerance
        assert!(store.record_miss("peer-key"));
        // counter was reset on eviction: the cycle starts over
        assert!(!store.record_miss("peer-key"));
    }

    #[test]
    fn test_hit_resets_miss_counter() {
        let store = test_store(DEFAULT_STATUS_TTL);

        assert!(!store.record_miss("peer-key"));
        assert!(!store.record_miss("peer-key"));
        store.clear_miss("peer-key");
        assert!(!store.record_miss("peer-key"));
        assert!(!store.record_miss("peer-key"));
        assert!(store.record_miss("peer-key"));
    }

    #[test]
    fn test_miss_counters_are_per_peer() {
        let store = test_store(DEFAULT_STATUS_TTL);

        assert!(!store.record_miss("peer-a"));
        assert!(!store.record_miss("peer-a"));
        assert!(!store.record_miss("peer-b"));
        assert!(store.record_miss("peer-a"));
        assert!(!store.record_miss("peer-b"));
    }

    // Integration tests below need a live Redis; point REDIS_URL at one
    // and run with `cargo test -- --ignored`.

    fn live_config() -> Option<RedisStoreConfig> {
        std::env::var("REDIS_URL")
            .ok()
            .map(|url| RedisStoreConfig::new(url).with_status_ttl(Duration::from_secs(2)))
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_publish_and_fetch() {
        let config = live_config().expect("REDIS_URL must be set");
        let cluster = format!("it-{}", Uuid::new_v4());

        let a = RedisStore::new(config.clone(), &cluster, Some("a".into())).unwrap();
        let b = RedisStore::new(config, &cluster, Some("b".into())).unwrap();

        a.publish_self_status(Status::new(10.0, "a", "a.test"))
            .await
            .unwrap();
        b.publish_self_status(Status::new(20.0, "b", "b.test"))
            .await
            .unwrap();

        let peers = a.get_peer_statuses().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].name, "b");

        a.stop().await.unwrap();
        let peers = b.get_peer_statuses().await.unwrap();
        assert!(peers.is_empty());
        b.stop().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_expired_record_is_pruned_after_tolerance() {
        let config = live_config().expect("REDIS_URL must be set");
        let cluster = format!("it-{}", Uuid::new_v4());

        let a = RedisStore::new(config.clone(), &cluster, Some("a".into())).unwrap();
        let b = RedisStore::new(config, &cluster, Some("b".into())).unwrap();

        a.publish_self_status(Status::new(10.0, "a", "a.test"))
            .await
            .unwrap();
        // let the record expire without a refresh
        tokio::time::sleep(Duration::from_secs(3)).await;

        // three fetches: two tolerated misses, then the prune
        for _ in 0..3 {
            let peers = b.get_peer_statuses().await.unwrap();
            assert!(peers.is_empty());
        }

        let mut conn = b.connection().await.unwrap();
        let mapping: HashMap<String, String> = conn.hgetall(&b.cluster_key).await.unwrap();
        assert!(!mapping.contains_key("a"));

        b.stop().await.unwrap();
    }
}
