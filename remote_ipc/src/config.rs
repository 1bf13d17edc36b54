//! Connection configuration

use crate::error::RemoteIpcError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of an [`IpcConnection`](crate::IpcConnection)
///
/// Durations are written as milliseconds when (de)serialized; missing fields
/// take their default.
///
/// ```
/// use remote_ipc::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig::from_json(r#"{ "max_workers": 2, "poll_interval": 5 }"#).unwrap();
/// assert_eq!(config.max_workers, 2);
/// assert_eq!(config.poll_interval, Duration::from_millis(5));
/// assert_eq!(config.stop_ack_timeout, Duration::from_millis(1000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Bounded wait for the peer to acknowledge a stop request
    #[serde(with = "millis")]
    pub stop_ack_timeout: Duration,
    /// Sleep between probes of the readiness waits
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// How often the reception loop wakes up to check for a local stop
    #[serde(with = "millis")]
    pub recv_poll_interval: Duration,
    /// Threads serving incoming requests
    pub max_workers: usize,
    /// Requests queued before extra ones spill onto overflow threads
    pub worker_queue_depth: usize,
    /// Timeout applied by `call` when the caller passes none
    #[serde(with = "opt_millis")]
    pub default_call_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            stop_ack_timeout: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(10),
            recv_poll_interval: Duration::from_millis(50),
            max_workers: 8,
            worker_queue_depth: 64,
            default_call_timeout: None,
        }
    }
}

impl ConnectionConfig {
    /// Parses a JSON document and validates it
    pub fn from_json(text: &str) -> Result<Self, RemoteIpcError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| RemoteIpcError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_stop_ack_timeout(mut self, timeout: Duration) -> Self {
        self.stop_ack_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_recv_poll_interval(mut self, interval: Duration) -> Self {
        self.recv_poll_interval = interval;
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_worker_queue_depth(mut self, depth: usize) -> Self {
        self.worker_queue_depth = depth;
        self
    }

    pub fn with_default_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_call_timeout = timeout;
        self
    }

    /// Rejects values the connection cannot run with
    pub fn validate(&self) -> Result<(), RemoteIpcError> {
        if self.max_workers == 0 {
            return Err(RemoteIpcError::Config(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.worker_queue_depth == 0 {
            return Err(RemoteIpcError::Config(
                "worker_queue_depth must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() || self.recv_poll_interval.is_zero() {
            return Err(RemoteIpcError::Config(
                "poll intervals must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => super::millis::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.stop_ack_timeout, Duration::from_secs(1));
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.default_call_timeout, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_uses_milliseconds() {
        let config = ConnectionConfig::default()
            .with_stop_ack_timeout(Duration::from_millis(250))
            .with_default_call_timeout(Some(Duration::from_secs(3)));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["stop_ack_timeout"], 250);
        assert_eq!(json["default_call_timeout"], 3000);

        let parsed: ConnectionConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_null_call_timeout() {
        let config = ConnectionConfig::from_json(r#"{ "default_call_timeout": null }"#).unwrap();
        assert_eq!(config.default_call_timeout, None);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let err = ConnectionConfig::from_json(r#"{ "max_workers": 0 }"#).unwrap_err();
        assert!(matches!(err, RemoteIpcError::Config(_)));

        let config = ConnectionConfig::default().with_worker_queue_depth(0);
        assert!(config.validate().is_err());

        let config = ConnectionConfig::default().with_recv_poll_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let err = ConnectionConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, RemoteIpcError::Config(_)));
    }
}
