//! Decentralized self-balancing load advisor for peer fleets.
//!
//! Every instance of a service fleet runs one [`Advisor`]. The advisor:
//! - periodically publishes the instance's load value to shared storage,
//! - periodically fetches the values its peers published,
//! - and tells the caller whether it is overloaded relative to the
//!   fleet and, if so, which peer should receive redirected load.
//!
//! There is no coordinator and no consensus: each instance reasons
//! independently over a possibly stale snapshot, and repeated
//! application of the advice trends the fleet toward balance.
//!
//! # Example
//!
//! ```rust,no_run
//! use loadvisor::{Advisor, AdvisorConfig, AdvisorEvent, LoadSample};
//! use loadvisor::storage::{RedisStoreConfig, StorageConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AdvisorConfig::new("my-service")
//!         .with_self_address("instance1.my-service.example");
//!
//!     // the collaborator that knows the local load
//!     let source = Arc::new(|| LoadSample::new(open_connections()));
//!
//!     let storage = StorageConfig::Redis(RedisStoreConfig::new("redis://127.0.0.1:6379"));
//!     let (advisor, mut events) = Advisor::new(config, source, storage)?;
//!
//!     advisor.ready().await?;
//!     advisor.start();
//!
//!     while let Some(event) = events.recv().await {
//!         if let AdvisorEvent::Advice(advice) = event {
//!             if let Some(change) = advice.proposed_change() {
//!                 redirect(change.reduction, &change.target.address);
//!             }
//!         }
//!     }
//!     advisor.stop().await?;
//!     Ok(())
//! }
//! # fn open_connections() -> f64 { 0.0 }
//! # fn redirect(_count: f64, _to: &str) {}
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Application                    │
//! │   StatusSource ──┐          ┌── events       │
//! └──────────────────┼──────────┼───────────────┘
//!                    ▼          │
//! ┌─────────────────────────────────────────────┐
//! │                 Advisor                      │
//! │  • reporting loop: publish self status       │
//! │  • advising loop:  update + compute advice   │
//! │  • on demand: update / get_advice            │
//! └─────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────┐
//! │           StatusStore (trait)                │
//! │   RedisStore │ ZookeeperStore │ MemoryStore  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Storage backends
//!
//! Two production backends with different liveness models sit behind
//! one contract. The Redis backend publishes expiring records and
//! tolerates a couple of read misses before pruning a peer; the
//! ZooKeeper backend keeps an ephemeral node per instance that the
//! service removes the instant the owning session dies. Records use the
//! same wire format either way, and a custom backend can be plugged in
//! through [`storage::StorageConfig::Custom`].

pub mod advisor;
pub mod balance;
pub mod config;
pub mod error;
pub mod status;
pub mod storage;
pub mod testing;

// Re-export the main types for convenience
pub use advisor::{Advisor, AdvisorEvent};
pub use balance::{compute_advice, Advice, BalancePolicy, Change};
pub use config::{intervals, precisions, step_sizes, AdvisorConfig};
pub use error::{Error, Result, StorageError};
pub use status::{LoadSample, Status, StatusSource};
pub use storage::{
    MemoryCluster, MemoryStore, RedisStore, RedisStoreConfig, StatusStore, StorageConfig,
    ZookeeperStore, ZookeeperStoreConfig,
};
