//! Balancing decision logic.
//!
//! The decision is a pure function of one cycle's status snapshot: given
//! the local status, the fetched peer statuses and the tuning policy, it
//! either proposes a single redirection toward the least loaded healthy
//! peer or proposes nothing. It holds no state and its output depends
//! only on the snapshot contents, never on fetch completion order.

use crate::status::Status;
use std::time::Duration;

/// One proposed redirection.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// The proposed change to the local load. A negative `delta` is the
    /// number of units that should be redirected to `target`.
    pub delta: f64,

    /// The number of units `target` should expect to receive; `-delta`
    /// when `delta` is negative, `0` otherwise.
    pub reduction: f64,

    /// The peer that should receive the redirected load.
    pub target: Status,
}

impl Change {
    pub(crate) fn new(delta: f64, target: Status) -> Self {
        let reduction = if delta < 0.0 { -delta } else { 0.0 };
        Self {
            delta,
            reduction,
            target,
        }
    }
}

/// The outcome of one advising cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Advice {
    /// Proposed redirections. At most one per cycle under the current
    /// policy; empty when the fleet is within tolerance or the local
    /// instance is not overloaded.
    pub changes: Vec<Change>,

    /// The local value minus the fleet mean at computation time.
    /// Informational only; reported whether or not a change is proposed.
    pub mean_delta: f64,
}

impl Advice {
    /// The proposed change, if this cycle produced one.
    pub fn proposed_change(&self) -> Option<&Change> {
        self.changes.first()
    }

    fn none() -> Self {
        Self {
            changes: Vec::new(),
            mean_delta: 0.0,
        }
    }
}

/// Tuning knobs of the balancing decision, fixed per advisor instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalancePolicy {
    /// Magnitude of a proposed redirection.
    pub step_size: f64,

    /// Minimum fleet-wide spread (max minus min) before any
    /// redirection is proposed.
    pub precision: f64,

    /// Maximum acceptable staleness of a peer report. `None` disables
    /// the staleness check.
    pub healthy_threshold: Option<Duration>,
}

/// Whether a peer participates in balancing at all.
///
/// An out-of-service peer (`max_capacity == 0`) never participates.
/// When a staleness threshold is configured, a peer only participates
/// if it carries a timestamp within the threshold; a report without a
/// timestamp cannot prove its freshness and is excluded.
pub(crate) fn is_healthy(peer: &Status, threshold: Option<Duration>, now_ms: i64) -> bool {
    if peer.is_out_of_service() {
        return false;
    }
    match threshold {
        None => true,
        Some(t) => match peer.timestamp {
            Some(ts) => (now_ms - ts).unsigned_abs() as u128 <= t.as_millis(),
            None => false,
        },
    }
}

/// Compute the advice for one cycle.
///
/// Healthy peers are filtered first and excluded peers affect nothing
/// downstream: they cannot be a redirect target and do not contribute
/// to the mean. With no healthy peers the local instance is
/// definitionally at the mean and no change is proposed.
///
/// A change is proposed iff the spread between the highest value (self
/// included) and the lowest peer value exceeds `precision` AND the
/// local value sits above the fleet mean. The target is the
/// lowest-valued peer; on ties the first peer in snapshot order wins.
pub fn compute_advice(
    self_status: &Status,
    peer_statuses: &[Status],
    policy: &BalancePolicy,
    now_ms: i64,
) -> Advice {
    let healthy: Vec<&Status> = peer_statuses
        .iter()
        .filter(|p| is_healthy(p, policy.healthy_threshold, now_ms))
        .collect();

    if healthy.is_empty() {
        return Advice::none();
    }

    let mut sum = self_status.value;
    let mut max_value = self_status.value;
    let mut min_peer = healthy[0];

    for peer in &healthy {
        sum += peer.value;
        if peer.value > max_value {
            max_value = peer.value;
        }
        if peer.value < min_peer.value {
            min_peer = peer;
        }
    }

    let num_instances = healthy.len() + 1;
    let mean = sum / num_instances as f64;
    let range = max_value - min_peer.value;

    let mut changes = Vec::new();
    if range > policy.precision && self_status.value > mean {
        changes.push(Change::new(-policy.step_size, min_peer.clone()));
    }

    Advice {
        changes,
        mean_delta: self_status.value - mean,
    }
}

/// The healthy peer with the lowest value that still has headroom.
///
/// Peers at or over their `max_capacity` are skipped even when they are
/// otherwise healthy. Ties resolve to the first peer in snapshot order.
pub fn least_utilized<'a>(
    peer_statuses: &'a [Status],
    threshold: Option<Duration>,
    now_ms: i64,
) -> Option<&'a Status> {
    let mut best: Option<&Status> = None;
    for peer in peer_statuses {
        if !is_healthy(peer, threshold, now_ms) || !peer.has_headroom() {
            continue;
        }
        match best {
            Some(b) if peer.value >= b.value => {}
            _ => best = Some(peer),
        }
    }
    best
}
