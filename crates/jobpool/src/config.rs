//! Executor configuration
//!
//! Worker count, heartbeat (the liveness/poll interval) and the teardown
//! grace period each worker waits before it becomes a zombie.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExecutorError;

/// Executor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Number of workers in the pool (also the in-flight job capacity)
    pub workers: usize,

    /// Liveness interval and granularity of expiration checks
    #[serde(with = "duration_millis")]
    pub heartbeat: Duration,

    /// Time a worker waits during teardown before it reports done
    #[serde(with = "duration_millis")]
    pub shutdown_grace: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            heartbeat: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

impl ExecutorConfig {
    /// Create a configuration for a pool of `workers` workers
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    ///
    /// - `JOBPOOL_WORKERS`: number of workers (default: 4)
    /// - `JOBPOOL_HEARTBEAT_MS`: heartbeat in milliseconds (default: 1000)
    /// - `JOBPOOL_SHUTDOWN_GRACE_MS`: teardown grace in milliseconds (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let workers = std::env::var("JOBPOOL_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.workers);

        let heartbeat = std::env::var("JOBPOOL_HEARTBEAT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.heartbeat);

        let shutdown_grace = std::env::var("JOBPOOL_SHUTDOWN_GRACE_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.shutdown_grace);

        Self {
            workers,
            heartbeat,
            shutdown_grace,
        }
    }

    /// Set the number of workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Set the teardown grace period
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ExecutorError> {
        if self.workers == 0 {
            return Err(ExecutorError::InvalidConfig(
                "workers must be greater than zero".into(),
            ));
        }
        if self.heartbeat.is_zero() {
            return Err(ExecutorError::InvalidConfig(
                "heartbeat must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExecutorConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.heartbeat, Duration::from_secs(1));
        assert_eq!(config.shutdown_grace, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ExecutorConfig::new(2)
            .with_heartbeat(Duration::from_millis(50))
            .with_shutdown_grace(Duration::from_millis(10));

        assert_eq!(config.workers, 2);
        assert_eq!(config.heartbeat, Duration::from_millis(50));
        assert_eq!(config.shutdown_grace, Duration::from_millis(10));

        let config = config.with_workers(8);
        assert_eq!(config.workers, 8);
    }

    #[test]
    fn test_validate_rejects_empty_pool() {
        let err = ExecutorConfig::new(0).validate().unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidConfig(_)));
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn test_validate_rejects_zero_heartbeat() {
        let err = ExecutorConfig::default()
            .with_heartbeat(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("heartbeat"));
    }

    #[test]
    fn test_zero_grace_is_valid() {
        let config = ExecutorConfig::default().with_shutdown_grace(Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = ExecutorConfig::new(3).with_heartbeat(Duration::from_millis(250));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["workers"], 3);
        assert_eq!(json["heartbeat"], 250);
        assert_eq!(json["shutdown_grace"], 1000);

        let parsed: ExecutorConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }
}
