//! Ephemeral-node storage backend over ZooKeeper.
//!
//! Layout per cluster: a persistent namespace node
//! `/loadvisor/{cluster}` with one ephemeral child per live instance,
//! holding the serialized status as its payload. The coordination
//! service removes an instance's node the moment its session ends, so
//! crash and partition detection come for free and no miss counting is
//! needed.
//!
//! Session establishment is memoized: the first caller performs the
//! one-time setup (connect, ensure namespace, create self node) while
//! concurrent callers wait on the same attempt. Re-establishment after
//! a session failure counts consecutive failures; past the ceiling the
//! store latches into a permanent failure state and every further
//! operation fails fast.

use crate::error::{Result, StorageError};
use crate::status::Status;
use crate::storage::StatusStore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;
use zookeeper_client as zk;

const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 10;
const STOP_WAIT: Duration = Duration::from_secs(1);

/// Payload of a freshly created node that has not published yet.
const EMPTY_PAYLOAD: &[u8] = b"{}";

/// Configuration for [`ZookeeperStore`].
#[derive(Debug, Clone)]
pub struct ZookeeperStoreConfig {
    /// ZooKeeper connection string, e.g. `127.0.0.1:2181`.
    pub url: String,

    /// Requested session timeout.
    pub session_timeout: Duration,

    /// Ceiling on consecutive session-establishment failures before the
    /// store gives up permanently.
    pub max_consecutive_failures: u32,
}

impl Default for ZookeeperStoreConfig {
    fn default() -> Self {
        Self {
            url: "127.0.0.1:2181".into(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

impl ZookeeperStoreConfig {
    /// Create a configuration for the given connection string.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the requested session timeout.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set the consecutive-failure ceiling.
    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }
}

struct SessionSlot {
    client: Option<Arc<zk::Client>>,
    consecutive_failures: u32,
    failed_permanently: bool,
}

/// Ephemeral-node [`StatusStore`] over ZooKeeper.
pub struct ZookeeperStore {
    self_name: String,
    cluster_path: String,
    self_path: String,
    config: ZookeeperStoreConfig,
    session: tokio::sync::Mutex<SessionSlot>,
    stopped: AtomicBool,
}

impl ZookeeperStore {
    /// Create a store for the given cluster namespace.
    ///
    /// The instance name is generated when not supplied. No session is
    /// established yet; that happens lazily on first use.
    pub fn new(
        config: ZookeeperStoreConfig,
        cluster_name: impl Into<String>,
        self_name: Option<String>,
    ) -> Self {
        let self_name = self_name.unwrap_or_else(|| Uuid::new_v4().to_string());
        let cluster_path = format!("/loadvisor/{}", cluster_name.into());
        let self_path = format!("{cluster_path}/{self_name}");
        Self {
            self_name,
            cluster_path,
            self_path,
            config,
            session: tokio::sync::Mutex::new(SessionSlot {
                client: None,
                consecutive_failures: 0,
                failed_permanently: false,
            }),
            stopped: AtomicBool::new(false),
        }
    }

    /// The established session, setting one up if needed.
    ///
    /// Holding the slot lock for the whole attempt means concurrent
    /// callers wait on the same setup instead of racing their own.
    async fn session(&self) -> Result<Arc<zk::Client>> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(StorageError::Stopped.into());
        }
        let mut slot = self.session.lock().await;
        if slot.failed_permanently {
            return Err(StorageError::ConnectionFailed {
                attempts: slot.consecutive_failures,
            }
            .into());
        }
        if let Some(client) = &slot.client {
            return Ok(client.clone());
        }

        loop {
            match self.establish().await {
                Ok(client) => {
                    slot.consecutive_failures = 0;
                    let client = Arc::new(client);
                    slot.client = Some(client.clone());
                    return Ok(client);
                }
                Err(e) => {
                    slot.consecutive_failures += 1;
                    warn!(
                        error = %e,
                        attempts = slot.consecutive_failures,
                        "ZooKeeper session establishment failed"
                    );
                    if slot.consecutive_failures > self.config.max_consecutive_failures {
                        slot.failed_permanently = true;
                        return Err(StorageError::ConnectionFailed {
                            attempts: slot.consecutive_failures,
                        }
                        .into());
                    }
                }
            }
        }
    }

    /// Connect and perform the one-time setup: ensure the namespace
    /// exists and create this instance's ephemeral node.
    async fn establish(&self) -> std::result::Result<zk::Client, zk::Error> {
        let mut connector = zk::Client::connector();
        connector.session_timeout(self.config.session_timeout);
        let client = connector.connect(&self.config.url).await?;

        self.ensure_namespace(&client).await?;

        match client
            .create(
                &self.self_path,
                EMPTY_PAYLOAD,
                &zk::CreateMode::Ephemeral.with_acls(zk::Acls::anyone_all()),
            )
            .await
        {
            Ok(_) | Err(zk::Error::NodeExists) => {}
            Err(e) => return Err(e),
        }

        debug!(path = %self.self_path, "ZooKeeper session established");
        Ok(client)
    }

    async fn ensure_namespace(&self, client: &zk::Client) -> std::result::Result<(), zk::Error> {
        let mut path = String::new();
        for segment in self.cluster_path.split('/').filter(|s| !s.is_empty()) {
            path.push('/');
            path.push_str(segment);
            match client
                .create(
                    &path,
                    &[],
                    &zk::CreateMode::Persistent.with_acls(zk::Acls::anyone_all()),
                )
                .await
            {
                Ok(_) | Err(zk::Error::NodeExists) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Drop the cached session after a session-level failure so the
    /// next operation re-establishes it.
    async fn invalidate_session(&self, error: &zk::Error) {
        if is_session_error(error) {
            let mut slot = self.session.lock().await;
            slot.client = None;
        }
    }

    async fn op_error(&self, error: zk::Error) -> crate::error::Error {
        self.invalidate_session(&error).await;
        StorageError::Zookeeper(error).into()
    }
}

fn is_session_error(error: &zk::Error) -> bool {
    matches!(
        error,
        zk::Error::SessionExpired | zk::Error::ConnectionLoss | zk::Error::AuthFailed
    )
}

#[async_trait]
impl StatusStore for ZookeeperStore {
    async fn ready(&self) -> Result<()> {
        self.session().await.map(|_| ())
    }

    async fn publish_self_status(&self, status: Status) -> Result<Status> {
        let payload = status.serialize()?;
        let client = self.session().await?;

        match client
            .set_data(&self.self_path, payload.as_bytes(), None)
            .await
        {
            Ok(_) => Ok(status),
            // The ephemeral node went away with an earlier session;
            // recreate it with the fresh payload.
            Err(zk::Error::NoNode) => {
                match client
                    .create(
                        &self.self_path,
                        payload.as_bytes(),
                        &zk::CreateMode::Ephemeral.with_acls(zk::Acls::anyone_all()),
                    )
                    .await
                {
                    Ok(_) => Ok(status),
                    Err(e) => Err(self.op_error(e).await),
                }
            }
            Err(e) => Err(self.op_error(e).await),
        }
    }

    async fn get_peer_statuses(&self) -> Result<Vec<Status>> {
        let client = self.session().await?;

        let children = match client.list_children(&self.cluster_path).await {
            Ok(children) => children,
            Err(e) => return Err(self.op_error(e).await),
        };
        let peers: Vec<String> = children
            .into_iter()
            .filter(|child| child != &self.self_name)
            .collect();

        // Fan out the payload reads; reassemble by index so the result
        // order is the listing order, not completion order.
        let mut reads = JoinSet::new();
        for (idx, child) in peers.iter().enumerate() {
            let client = client.clone();
            let path = format!("{}/{}", self.cluster_path, child);
            reads.spawn(async move {
                let result = client.get_data(&path).await;
                (idx, result)
            });
        }

        let mut payloads: Vec<Option<Vec<u8>>> = vec![None; peers.len()];
        while let Some(joined) = reads.join_next().await {
            let (idx, result) = joined.map_err(|e| crate::error::Error::Internal(e.to_string()))?;
            match result {
                Ok((data, _stat)) => payloads[idx] = Some(data),
                // Gone between listing and reading: the peer's session
                // ended. Not an error, just absent.
                Err(zk::Error::NoNode) => {}
                Err(e) => return Err(self.op_error(e).await),
            }
        }

        let mut statuses = Vec::with_capacity(peers.len());
        for (child, payload) in peers.iter().zip(payloads) {
            let Some(payload) = payload else { continue };
            if payload.is_empty() || payload == EMPTY_PAYLOAD {
                // Registered but not yet published.
                continue;
            }
            let raw = String::from_utf8_lossy(&payload);
            match Status::deserialize(&raw) {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    warn!(peer = %child, error = %e, "Dropping corrupt peer record");
                }
            }
        }
        Ok(statuses)
    }

    async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let client = {
            let mut slot = self.session.lock().await;
            slot.client.take()
        };
        if let Some(client) = client {
            // Dropping the last handle closes the session, which removes
            // our ephemeral node. Wait a bounded moment for the session
            // to reach a terminal state.
            let mut watcher = client.state_watcher();
            drop(client);
            let wait = async {
                loop {
                    if watcher.changed().await.is_terminated() {
                        break;
                    }
                }
            };
            if tokio::time::timeout(STOP_WAIT, wait).await.is_err() {
                debug!("Timed out waiting for ZooKeeper session teardown");
            }
        }
        Ok(())
    }

    fn self_name(&self) -> &str {
        &self.self_name
    }
}

impl std::fmt::Debug for ZookeeperStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZookeeperStore")
            .field("self_name", &self.self_name)
            .field("cluster_path", &self.cluster_path)
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish()
    }
}
