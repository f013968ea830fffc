//! Status value objects and the self-status collaborator seam.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// One instance's reported load.
///
/// A `Status` is rebuilt from scratch every reporting cycle and never
/// mutated in place. Both storage backends persist it in the same flat
/// record shape, so records written by one backend are readable by the
/// other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// The current load of the instance (e.g. number of open connections).
    pub value: f64,

    /// A unique name for the instance, stable for its lifetime.
    pub name: String,

    /// The address other instances can use to reach this instance
    /// (e.g. a domain name such as "instance1.myservice.example").
    pub address: String,

    /// The maximum load of the instance.
    ///
    /// `Some(0.0)` means the instance is out of service and must not
    /// receive redirected load. `None` means there is no upper bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_capacity: Option<f64>,

    /// Wall-clock time at which the instance reported this status,
    /// in milliseconds since the Unix epoch. Used for staleness checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Status {
    /// Create a status with the required fields.
    pub fn new(value: f64, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            value,
            name: name.into(),
            address: address.into(),
            max_capacity: None,
            timestamp: None,
        }
    }

    /// Set the maximum capacity.
    pub fn with_max_capacity(mut self, max_capacity: f64) -> Self {
        self.max_capacity = Some(max_capacity);
        self
    }

    /// Set the report timestamp (epoch milliseconds).
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Whether the instance is explicitly out of service.
    pub fn is_out_of_service(&self) -> bool {
        self.max_capacity == Some(0.0)
    }

    /// Whether the instance can still take on more load.
    pub fn has_headroom(&self) -> bool {
        self.max_capacity.map_or(true, |cap| self.value < cap)
    }

    /// Check that the required fields carry usable data.
    ///
    /// Rejects with a descriptive error instead of passing silently:
    /// a publish cycle that would ship an unusable record must fail.
    pub fn validate(&self) -> Result<()> {
        if !self.value.is_finite() {
            return Err(Error::InvalidStatus(format!(
                "a numeric value must be provided, got {}",
                self.value
            )));
        }
        if self.name.is_empty() {
            return Err(Error::InvalidStatus("a name must be provided".into()));
        }
        Ok(())
    }

    /// Serialize to the shared wire format.
    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from the shared wire format.
    ///
    /// Fails when the record is not valid JSON or is missing a required
    /// field; the caller decides whether that aborts the cycle or only
    /// drops the one record.
    pub fn deserialize(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// What a [`StatusSource`] reports: the current load value, optionally
/// with the instance's capacity ceiling.
///
/// A bare number converts into a sample, so simple callers can return
/// `value.into()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSample {
    /// The current load value.
    pub value: f64,

    /// The capacity ceiling, if the instance has one.
    pub max_capacity: Option<f64>,
}

impl LoadSample {
    /// Create a sample for the given load value.
    pub fn new(value: f64) -> Self {
        Self {
            value,
            max_capacity: None,
        }
    }

    /// Set the capacity ceiling.
    pub fn with_max_capacity(mut self, max_capacity: f64) -> Self {
        self.max_capacity = Some(max_capacity);
        self
    }
}

impl From<f64> for LoadSample {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

/// External collaborator that supplies the local load value.
///
/// The advisor samples this on every reporting cycle and promotes the
/// result into a full [`Status`] before publishing.
#[async_trait]
pub trait StatusSource: Send + Sync + 'static {
    /// Report the instance's current load.
    async fn sample(&self) -> Result<LoadSample>;
}

/// Any plain closure returning a [`LoadSample`] is a valid source.
#[async_trait]
impl<F> StatusSource for F
where
    F: Fn() -> LoadSample + Send + Sync + 'static,
{
    async fn sample(&self) -> Result<LoadSample> {
        Ok(self())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_preserves_all_fields() {
        let status = Status::new(42.0, "instance-1", "instance1.service.example")
            .with_max_capacity(100.0)
            .with_timestamp(1_700_000_000_123);

        let raw = status.serialize().unwrap();
        let decoded = Status::deserialize(&raw).unwrap();
        assert_eq!(decoded, status);
    }

    #[test]
    fn test_wire_format_uses_camel_case_and_omits_absent_fields() {
        let status = Status::new(7.5, "a", "b");
        let raw = status.serialize().unwrap();

        assert!(raw.contains("\"value\":7.5"));
        assert!(raw.contains("\"name\":\"a\""));
        assert!(raw.contains("\"address\":\"b\""));
        assert!(!raw.contains("maxCapacity"));
        assert!(!raw.contains("timestamp"));

        let raw = status.with_max_capacity(10.0).serialize().unwrap();
        assert!(raw.contains("\"maxCapacity\":10.0"));
        assert!(!raw.contains("max_capacity"));
    }

    #[test]
    fn test_deserialize_rejects_missing_value() {
        let err = Status::deserialize(r#"{"name":"a","address":"b"}"#).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(Status::deserialize("not json").is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite_value() {
        let status = Status::new(f64::NAN, "a", "b");
        let err = status.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidStatus(_)));

        let status = Status::new(f64::INFINITY, "a", "b");
        assert!(status.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let status = Status::new(1.0, "", "b");
        assert!(status.validate().is_err());
    }

    #[test]
    fn test_out_of_service_and_headroom() {
        let status = Status::new(5.0, "a", "b").with_max_capacity(0.0);
        assert!(status.is_out_of_service());
        assert!(!status.has_headroom());

        let status = Status::new(5.0, "a", "b").with_max_capacity(10.0);
        assert!(!status.is_out_of_service());
        assert!(status.has_headroom());

        let status = Status::new(10.0, "a", "b").with_max_capacity(10.0);
        assert!(!status.has_headroom());

        let status = Status::new(1e9, "a", "b");
        assert!(status.has_headroom());
    }

    #[test]
    fn test_numeric_shorthand_promotes_to_sample() {
        let sample: LoadSample = 12.0.into();
        assert_eq!(sample.value, 12.0);
        assert_eq!(sample.max_capacity, None);

        let sample = LoadSample::new(12.0).with_max_capacity(50.0);
        assert_eq!(sample.max_capacity, Some(50.0));
    }

    #[tokio::test]
    async fn test_closure_is_a_status_source() {
        let source = || LoadSample::new(3.0);
        let sample = source.sample().await.unwrap();
        assert_eq!(sample.value, 3.0);
    }
}
