//! Configuration value objects for the agent.
//!
//! Configuration is loaded externally; these structs are the immutable
//! values the pipeline consumes. None of them are re-read after a session
//! starts; reconfiguring a sink means restarting the session.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{LoggerheadError, Result};
use crate::types::Severity;

// ----------------------------------------------------------------------------
// Publisher Configuration
// ----------------------------------------------------------------------------

/// The queue's absolute capacity ceiling; larger configured values clamp.
pub const MAX_QUEUE_LENGTH_CAP: usize = 50_000;

/// Configuration for the messenger queue and its worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Upgrade every fire-and-forget enqueue to wait-for-commit, turning
    /// the pipeline into a direct pass-through.
    pub force_synchronous: bool,
    /// Bounded queue capacity, in packets.
    pub max_queue_length: usize,
    /// How long a producer blocks on a full queue before the enqueue fails.
    pub overflow_timeout: Duration,
    /// Sinks are flushed at least this often even with no traffic.
    pub auto_flush_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            force_synchronous: false,
            max_queue_length: 2_000,           // packets
            overflow_timeout: Duration::from_secs(2),
            auto_flush_interval: Duration::from_secs(15),
        }
    }
}

impl PublisherConfig {
    /// Configuration for tests: tiny queue, fast flushes.
    pub fn testing() -> Self {
        Self {
            force_synchronous: false,
            max_queue_length: 64,
            overflow_timeout: Duration::from_millis(100),
            auto_flush_interval: Duration::from_millis(50),
        }
    }

    /// Capacity after applying the hard cap.
    pub fn effective_queue_length(&self) -> usize {
        self.max_queue_length.min(MAX_QUEUE_LENGTH_CAP)
    }
}

// ----------------------------------------------------------------------------
// File Messenger Configuration
// ----------------------------------------------------------------------------

/// Configuration for the file sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMessengerConfig {
    pub enabled: bool,
    /// Repository directory session files are written into.
    pub repository: PathBuf,
    /// Rotate the active file past this many bytes.
    pub max_file_size: u64,
    /// Rotate the active file past this age.
    pub max_file_duration: Duration,
    /// Delete old finished files per the limits below.
    pub enable_file_pruning: bool,
    /// Total bytes of finished files to keep in the repository.
    pub max_local_disk_usage: u64,
    /// Finished files older than this are pruned.
    pub max_local_file_age: Duration,
    /// Prune oldest-first while the volume has less free space than this.
    pub minimum_free_disk: u64,
    /// How long to wait for the repository lock during mutations.
    pub lock_timeout: Duration,
}

impl Default for FileMessengerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            repository: PathBuf::from("."),
            max_file_size: 10 * 1024 * 1024,               // 10 MiB
            max_file_duration: Duration::from_secs(3_600), // 1 hour
            enable_file_pruning: true,
            max_local_disk_usage: 256 * 1024 * 1024,       // 256 MiB
            max_local_file_age: Duration::from_secs(86_400 * 14), // 14 days
            minimum_free_disk: 200 * 1024 * 1024,          // 200 MiB
            lock_timeout: Duration::from_secs(5),
        }
    }
}

impl FileMessengerConfig {
    /// Configuration for tests: small files, no pruning surprises.
    pub fn testing(repository: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            repository: repository.into(),
            max_file_size: 16 * 1024,
            max_file_duration: Duration::from_secs(3_600),
            enable_file_pruning: false,
            max_local_disk_usage: u64::MAX,
            max_local_file_age: Duration::from_secs(86_400),
            minimum_free_disk: 0,
            lock_timeout: Duration::from_secs(5),
        }
    }
}

// ----------------------------------------------------------------------------
// Network Messenger Configuration
// ----------------------------------------------------------------------------

/// Configuration for the live-view network sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkMessengerConfig {
    pub enabled: bool,
    /// `host:port` of the viewer/collection endpoint.
    pub endpoint: String,
    pub connect_timeout: Duration,
}

impl Default for NetworkMessengerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

// ----------------------------------------------------------------------------
// Alert Configuration
// ----------------------------------------------------------------------------

/// Configuration for the alert/notification hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Messages at or above this severity fire a notification.
    /// Severity ordering is inverted; the comparison goes through
    /// [`Severity::is_at_least`].
    pub severity_threshold: Severity,
    /// A notification also fires when this much time passes with messages
    /// pending, regardless of severity.
    pub max_alert_interval: Duration,
    /// After a notification, suppress further ones for this long.
    /// Handlers may extend the window per event.
    pub minimum_delay: Option<Duration>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            severity_threshold: Severity::Error,
            max_alert_interval: Duration::from_secs(30),
            minimum_delay: None,
        }
    }
}

impl AlertConfig {
    pub fn testing() -> Self {
        Self {
            severity_threshold: Severity::Error,
            max_alert_interval: Duration::from_millis(200),
            minimum_delay: None,
        }
    }
}

// ----------------------------------------------------------------------------
// Retry Policy
// ----------------------------------------------------------------------------

/// Bounded exponential backoff for sink write failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn testing() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor as f64) as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }
}

// ----------------------------------------------------------------------------
// Master Configuration
// ----------------------------------------------------------------------------

/// Everything a session needs to run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    pub publisher: PublisherConfig,
    pub file: FileMessengerConfig,
    pub network: NetworkMessengerConfig,
    pub alerts: AlertConfig,
    pub retry: RetryPolicy,
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration optimized for tests: small limits, fast timings,
    /// file sink in the given repository, no network.
    pub fn testing(repository: impl Into<PathBuf>) -> Self {
        Self {
            publisher: PublisherConfig::testing(),
            file: FileMessengerConfig::testing(repository),
            network: NetworkMessengerConfig::default(),
            alerts: AlertConfig::testing(),
            retry: RetryPolicy::testing(),
        }
    }

    pub fn with_publisher(mut self, publisher: PublisherConfig) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_file(mut self, file: FileMessengerConfig) -> Self {
        self.file = file;
        self
    }

    pub fn with_network(mut self, network: NetworkMessengerConfig) -> Self {
        self.network = network;
        self
    }

    pub fn with_alerts(mut self, alerts: AlertConfig) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate for consistency and feasibility.
    pub fn validate(&self) -> Result<()> {
        if self.publisher.max_queue_length == 0 {
            return Err(LoggerheadError::config_error(
                "max_queue_length cannot be zero",
            ));
        }
        if self.publisher.auto_flush_interval.is_zero() {
            return Err(LoggerheadError::config_error(
                "auto_flush_interval cannot be zero",
            ));
        }
        if self.file.enabled {
            if self.file.repository.as_os_str().is_empty() {
                return Err(LoggerheadError::config_error(
                    "file sink enabled but repository path is empty",
                ));
            }
            if self.file.max_file_size == 0 {
                return Err(LoggerheadError::config_error(
                    "max_file_size cannot be zero",
                ));
            }
            if self.file.max_file_duration.is_zero() {
                return Err(LoggerheadError::config_error(
                    "max_file_duration cannot be zero",
                ));
            }
        }
        if self.network.enabled && self.network.endpoint.is_empty() {
            return Err(LoggerheadError::config_error(
                "network sink enabled but endpoint is empty",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(LoggerheadError::config_error(
                "retry max_attempts cannot be zero",
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(LoggerheadError::config_error(
                "retry multiplier must be at least 1.0",
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AgentConfig::default().validate().is_ok());
    }

    #[test]
    fn test_testing_config_is_valid() {
        assert!(AgentConfig::testing("/tmp/repo").validate().is_ok());
    }

    #[test]
    fn test_zero_queue_rejected() {
        let mut config = AgentConfig::default();
        config.publisher.max_queue_length = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_network_requires_endpoint() {
        let mut config = AgentConfig::default();
        config.network.enabled = true;
        assert!(config.validate().is_err());
        config.network.endpoint = "viewer.local:29105".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_queue_length_hard_cap() {
        let config = PublisherConfig {
            max_queue_length: 1_000_000,
            ..PublisherConfig::default()
        };
        assert_eq!(config.effective_queue_length(), MAX_QUEUE_LENGTH_CAP);
    }

    #[test]
    fn test_retry_backoff_growth() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        // Capped at max_delay.
        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
    }
}
