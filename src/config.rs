//! Configuration for the advisor.

use crate::balance::BalancePolicy;
use crate::error::{Error, Result};
use std::time::Duration;

/// Named reporting/advising cadences.
pub mod intervals {
    use std::time::Duration;

    pub const HYPER_REALTIME: Duration = Duration::from_millis(100);
    pub const REALTIME: Duration = Duration::from_millis(1_000);
    pub const ACTIVE: Duration = Duration::from_millis(5_000);
    pub const PASSIVE: Duration = Duration::from_millis(30_000);
    pub const GLACIAL: Duration = Duration::from_millis(60_000);
}

/// Named balance-threshold sensitivities.
pub mod precisions {
    pub const HIGH: f64 = 5.0;
    pub const NORMAL: f64 = 10.0;
    pub const LOW: f64 = 50.0;
}

/// Named redirection magnitudes.
pub mod step_sizes {
    pub const SMALL: f64 = 1.0;
    pub const MEDIUM: f64 = 2.0;
    pub const LARGE: f64 = 5.0;
}

const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(2_500);
const DEFAULT_ADVICE_INTERVAL: Duration = Duration::from_millis(5_000);

/// Main configuration for an [`Advisor`](crate::Advisor).
#[derive(Debug, Clone)]
pub struct AdvisorConfig {
    /// Shared namespace all fleet members publish under. Required.
    pub cluster_name: String,

    /// Stable instance identity. Generated (UUID v4) if absent.
    pub self_name: Option<String>,

    /// The address advertised to peers as a redirect target.
    pub self_address: String,

    /// Magnitude of a proposed redirection.
    pub step_size: f64,

    /// Minimum fleet-wide spread before any redirection is proposed.
    pub precision: f64,

    /// Period of the reporting loop. `None` or zero disables the loop;
    /// publishing then only happens through on-demand `update` calls.
    pub report_interval: Option<Duration>,

    /// Period of the advising loop. `None` or zero disables the loop;
    /// advice is then only computed through on-demand `get_advice`.
    pub advice_interval: Option<Duration>,

    /// Maximum acceptable staleness of a peer report before the peer is
    /// excluded from balancing. `None` disables the staleness check.
    pub healthy_threshold: Option<Duration>,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            self_name: None,
            self_address: String::new(),
            step_size: step_sizes::MEDIUM,
            precision: precisions::NORMAL,
            report_interval: Some(DEFAULT_REPORT_INTERVAL),
            advice_interval: Some(DEFAULT_ADVICE_INTERVAL),
            healthy_threshold: None,
        }
    }
}

impl AdvisorConfig {
    /// Create a configuration for the given cluster namespace.
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            ..Default::default()
        }
    }

    /// Set the instance name instead of generating one.
    pub fn with_self_name(mut self, name: impl Into<String>) -> Self {
        self.self_name = Some(name.into());
        self
    }

    /// Set the address advertised to peers.
    pub fn with_self_address(mut self, address: impl Into<String>) -> Self {
        self.self_address = address.into();
        self
    }

    /// Set the redirection step size.
    pub fn with_step_size(mut self, step_size: f64) -> Self {
        self.step_size = step_size;
        self
    }

    /// Set the balance-threshold sensitivity.
    pub fn with_precision(mut self, precision: f64) -> Self {
        self.precision = precision;
        self
    }

    /// Set the reporting period.
    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = Some(interval);
        self
    }

    /// Disable the reporting loop.
    pub fn without_reporting(mut self) -> Self {
        self.report_interval = None;
        self
    }

    /// Set the advising period.
    pub fn with_advice_interval(mut self, interval: Duration) -> Self {
        self.advice_interval = Some(interval);
        self
    }

    /// Disable the advising loop.
    pub fn without_advising(mut self) -> Self {
        self.advice_interval = None;
        self
    }

    /// Set the peer staleness threshold.
    pub fn with_healthy_threshold(mut self, threshold: Duration) -> Self {
        self.healthy_threshold = Some(threshold);
        self
    }

    /// Reporting period with the zero-disables rule applied.
    pub fn effective_report_interval(&self) -> Option<Duration> {
        self.report_interval.filter(|d| !d.is_zero())
    }

    /// Advising period with the zero-disables rule applied.
    pub fn effective_advice_interval(&self) -> Option<Duration> {
        self.advice_interval.filter(|d| !d.is_zero())
    }

    /// The balancing policy this configuration describes.
    pub fn balance_policy(&self) -> BalancePolicy {
        BalancePolicy {
            step_size: self.step_size,
            precision: self.precision,
            healthy_threshold: self.healthy_threshold,
        }
    }

    /// Reject configurations the advisor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.is_empty() {
            return Err(Error::Config("cluster_name is required".into()));
        }
        if !self.step_size.is_finite() || self.step_size <= 0.0 {
            return Err(Error::Config(format!(
                "step_size must be a positive number, got {}",
                self.step_size
            )));
        }
        if !self.precision.is_finite() || self.precision < 0.0 {
            return Err(Error::Config(format!(
                "precision must be a non-negative number, got {}",
                self.precision
            )));
        }
        Ok(())
    }
}
