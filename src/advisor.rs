//! The advisor: periodic reporting/advising and on-demand queries.
//!
//! An [`Advisor`] owns two independent timer-driven loops. The
//! reporting loop samples the local [`StatusSource`] and publishes the
//! result; the advising loop refreshes the status snapshot and emits an
//! [`Advice`]. Each loop schedules its next tick only after the
//! previous cycle's work (including error handling) has completed, so a
//! slow backend stretches the cadence instead of piling up overlapping
//! executions.
//!
//! Everything the loops do is also available on demand: [`update`]
//! publishes and fetches without any loop running, and [`get_advice`]
//! computes advice from a fresh snapshot.
//!
//! [`update`]: Advisor::update
//! [`get_advice`]: Advisor::get_advice

use crate::balance::{self, Advice, BalancePolicy};
use crate::config::AdvisorConfig;
use crate::error::{Error, Result};
use crate::status::{epoch_millis, Status, StatusSource};
use crate::storage::{StatusStore, StorageConfig};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Events delivered on the channel returned by [`Advisor::new`].
#[derive(Debug)]
pub enum AdvisorEvent {
    /// The storage backend confirmed its connection for the first time.
    Ready,

    /// An advising cycle completed.
    Advice(Advice),

    /// A cycle failed. Non-fatal unless the error is permanent
    /// (see [`Error::is_permanent`]).
    Error(Error),
}

/// Which of the two loops a spawned task is driving.
#[derive(Debug, Clone, Copy)]
enum LoopKind {
    Report,
    Advise,
}

struct LoopState {
    shutdown: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl LoopState {
    const fn idle() -> Self {
        Self {
            shutdown: None,
            task: None,
        }
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

/// Periodically publishes the local load and advises on rebalancing.
pub struct Advisor {
    inner: Arc<Inner>,
    report_loop: Mutex<LoopState>,
    advise_loop: Mutex<LoopState>,
}

struct Inner {
    self_name: String,
    self_address: String,
    policy: BalancePolicy,
    report_interval: Option<Duration>,
    advice_interval: Option<Duration>,
    store: Arc<dyn StatusStore>,
    source: Arc<dyn StatusSource>,
    self_status: RwLock<Option<Status>>,
    peer_statuses: RwLock<Vec<Status>>,
    events: mpsc::UnboundedSender<AdvisorEvent>,
    ready_emitted: AtomicBool,
    stopped: AtomicBool,
}

impl Advisor {
    /// Create an advisor and the receiving end of its event channel.
    ///
    /// The storage connection is not opened here; it is established
    /// lazily on first use (await [`ready`](Advisor::ready) to force
    /// it). Loops do not start on their own — call
    /// [`start`](Advisor::start) or the individual
    /// `start_reporting`/`start_advising`.
    pub fn new(
        config: AdvisorConfig,
        source: Arc<dyn StatusSource>,
        storage: StorageConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<AdvisorEvent>)> {
        config.validate()?;

        let self_name = config
            .self_name
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let store = storage.build(&config.cluster_name, Some(self_name.clone()))?;
        // A pre-built backend already carries an identity; adopt it so
        // published statuses and the store agree on the name.
        let self_name = store.self_name().to_string();

        let (events, event_rx) = mpsc::unbounded_channel();

        info!(
            cluster = %config.cluster_name,
            name = %self_name,
            "Advisor created"
        );

        let inner = Arc::new(Inner {
            self_name,
            self_address: config.self_address.clone(),
            policy: config.balance_policy(),
            report_interval: config.effective_report_interval(),
            advice_interval: config.effective_advice_interval(),
            store,
            source,
            self_status: RwLock::new(None),
            peer_statuses: RwLock::new(Vec::new()),
            events,
            ready_emitted: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        });

        Ok((
            Self {
                inner,
                report_loop: Mutex::new(LoopState::idle()),
                advise_loop: Mutex::new(LoopState::idle()),
            },
            event_rx,
        ))
    }

    // ==================== Lifecycle ====================

    /// Resolves once the storage backend confirmed its connection.
    ///
    /// Consumers should await this before trusting any status data. The
    /// first success emits [`AdvisorEvent::Ready`].
    pub async fn ready(&self) -> Result<()> {
        self.inner.store.ready().await?;
        if !self.inner.ready_emitted.swap(true, Ordering::SeqCst) {
            self.inner.send_event(AdvisorEvent::Ready);
        }
        Ok(())
    }

    /// Start both loops. Equivalent to calling `start_reporting` and
    /// `start_advising`.
    pub fn start(&self) {
        self.start_reporting();
        self.start_advising();
    }

    /// Start the reporting loop.
    ///
    /// A no-op when the loop is already running, when reporting is
    /// disabled by configuration, or after `stop`.
    pub fn start_reporting(&self) {
        self.start_loop(LoopKind::Report);
    }

    /// Start the advising loop.
    ///
    /// A no-op when the loop is already running, when advising is
    /// disabled by configuration, or after `stop`.
    pub fn start_advising(&self) {
        self.start_loop(LoopKind::Advise);
    }

    fn start_loop(&self, kind: LoopKind) {
        let (slot, interval) = match kind {
            LoopKind::Report => (&self.report_loop, self.inner.report_interval),
            LoopKind::Advise => (&self.advise_loop, self.inner.advice_interval),
        };
        let Some(interval) = interval else {
            debug!(?kind, "Loop disabled by configuration");
            return;
        };
        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        let mut state = slot.lock();
        if state.is_running() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            loop {
                // The next tick is armed only after the previous cycle
                // (including error handling) has completed, so at most
                // one execution per loop is ever in flight.
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {
                        let result = match kind {
                            LoopKind::Report => inner.report_cycle().await,
                            LoopKind::Advise => inner.advise_cycle().await,
                        };
                        if let Err(e) = result {
                            warn!(?kind, error = %e, "Cycle failed");
                            let fatal = e.is_permanent();
                            inner.send_event(AdvisorEvent::Error(e));
                            if fatal {
                                // the backend latched into permanent
                                // failure; further cycles cannot succeed
                                break;
                            }
                        }
                    }
                }
                if inner.stopped.load(Ordering::SeqCst) {
                    break;
                }
            }
        });

        *state = LoopState {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        };
    }

    /// Stop the reporting loop. In-flight work finishes but does not
    /// reschedule.
    pub fn stop_reporting(&self) {
        let mut state = self.report_loop.lock();
        // dropping the sender wakes the loop out of its sleep
        state.shutdown.take();
        state.task.take();
    }

    /// Stop the advising loop. In-flight work finishes but does not
    /// reschedule.
    pub fn stop_advising(&self) {
        let mut state = self.advise_loop.lock();
        state.shutdown.take();
        state.task.take();
    }

    /// Halt both loops and release the storage backend.
    ///
    /// Idempotent: the backend is torn down exactly once, later calls
    /// are no-ops.
    pub async fn stop(&self) -> Result<()> {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(name = %self.inner.self_name, "Stopping advisor");
        self.stop_reporting();
        self.stop_advising();
        self.inner.store.stop().await
    }

    // ==================== On-demand operations ====================

    /// Publish the local status and fetch peer statuses, concurrently.
    ///
    /// Resolves when both halves finish; works with or without the
    /// loops running.
    pub async fn update(&self) -> Result<()> {
        self.inner.update().await
    }

    /// [`update`](Advisor::update) followed by the balancing
    /// computation, for strictly on-demand callers.
    pub async fn get_advice(&self) -> Result<Advice> {
        self.inner.update().await?;
        Ok(self.inner.compute_advice())
    }

    /// The healthy peer with the lowest value that still has headroom,
    /// from the latest snapshot.
    ///
    /// Call [`update`](Advisor::update) first when freshness matters.
    pub fn least_utilized_target(&self) -> Option<Status> {
        let peers = self.inner.peer_statuses.read();
        balance::least_utilized(&peers, self.inner.policy.healthy_threshold, epoch_millis())
            .cloned()
    }

    // ==================== Accessors ====================

    /// This instance's identity.
    pub fn self_name(&self) -> &str {
        &self.inner.self_name
    }

    /// The address advertised to peers.
    pub fn self_address(&self) -> &str {
        &self.inner.self_address
    }

    /// The most recently published local status, if any.
    pub fn self_status(&self) -> Option<Status> {
        self.inner.self_status.read().clone()
    }

    /// The most recently fetched peer snapshot.
    pub fn peer_statuses(&self) -> Vec<Status> {
        self.inner.peer_statuses.read().clone()
    }
}

impl Inner {
    fn send_event(&self, event: AdvisorEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    /// Sample the source, promote the sample into a status and publish.
    async fn publish_self(&self) -> Result<Status> {
        let sample = self.source.sample().await?;
        let mut status = Status::new(sample.value, self.self_name.clone(), self.self_address.clone())
            .with_timestamp(epoch_millis());
        status.max_capacity = sample.max_capacity;
        status.validate()?;

        let published = self.store.publish_self_status(status).await?;
        *self.self_status.write() = Some(published.clone());
        Ok(published)
    }

    async fn fetch_peers(&self) -> Result<Vec<Status>> {
        let peers = self.store.get_peer_statuses().await?;
        *self.peer_statuses.write() = peers.clone();
        Ok(peers)
    }

    async fn update(&self) -> Result<()> {
        let (published, fetched) = tokio::join!(self.publish_self(), self.fetch_peers());
        published?;
        fetched?;
        Ok(())
    }

    fn compute_advice(&self) -> Advice {
        let self_status = self.self_status.read().clone();
        let peers = self.peer_statuses.read().clone();
        match self_status {
            Some(status) => balance::compute_advice(&status, &peers, &self.policy, epoch_millis()),
            None => Advice {
                changes: Vec::new(),
                mean_delta: 0.0,
            },
        }
    }

    async fn report_cycle(&self) -> Result<()> {
        let status = self.publish_self().await?;
        debug!(value = status.value, "Published self status");
        Ok(())
    }

    async fn advise_cycle(&self) -> Result<()> {
        self.update().await?;
        let advice = self.compute_advice();
        debug!(
            changes = advice.changes.len(),
            mean_delta = advice.mean_delta,
            "Advice computed"
        );
        self.send_event(AdvisorEvent::Advice(advice));
        Ok(())
    }
}

impl std::fmt::Debug for Advisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Advisor")
            .field("self_name", &self.inner.self_name)
            .field("reporting", &self.report_loop.lock().is_running())
            .field("advising", &self.advise_loop.lock().is_running())
            .field("stopped", &self.inner.stopped.load(Ordering::SeqCst))
            .finish()
    }
}
