//! Configuration types for the ownership scheduler.

use crate::error::{Error, Result};
use std::time::Duration;

/// Default number of segments in the key space.
pub const DEFAULT_SEGMENT_COUNT: u32 = 256;

/// Default number of owners per segment (primary + backups).
pub const DEFAULT_NUM_OWNERS: usize = 2;

/// Main configuration for the scheduler and its topology listener.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Total number of segments in the key space.
    /// Fixed for the lifetime of a ring configuration.
    pub segment_count: u32,

    /// Number of owners per segment. Only the primary owner runs scheduled work.
    pub num_owners: usize,

    /// How long deregistration waits for an in-flight reconciliation
    /// before abandoning it.
    pub stop_timeout: Duration,

    /// A pre-apply cancellation pass taking longer than this is logged as slow.
    ///
    /// Cancellation runs on the membership source's notification path, so a
    /// source that enforces its own listener timeout should set this below it.
    pub cancel_warn_threshold: Duration,

    /// Label for the reconciliation worker, used in logs.
    pub worker_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            segment_count: DEFAULT_SEGMENT_COUNT,
            num_owners: DEFAULT_NUM_OWNERS,
            stop_timeout: Duration::from_secs(30),
            cancel_warn_threshold: Duration::from_secs(1),
            worker_name: "scheduler-reconciler".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the segment count.
    pub fn with_segment_count(mut self, segment_count: u32) -> Self {
        self.segment_count = segment_count;
        self
    }

    /// Set the number of owners per segment.
    pub fn with_num_owners(mut self, num_owners: usize) -> Self {
        self.num_owners = num_owners;
        self
    }

    /// Set the bounded shutdown wait.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Set the slow cancellation threshold.
    pub fn with_cancel_warn_threshold(mut self, threshold: Duration) -> Self {
        self.cancel_warn_threshold = threshold;
        self
    }

    /// Set the worker label.
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.segment_count == 0 {
            return Err(Error::Config("segment_count must be greater than 0".into()));
        }
        if self.num_owners == 0 {
            return Err(Error::Config("num_owners must be greater than 0".into()));
        }
        if self.worker_name.is_empty() {
            return Err(Error::Config("worker_name must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.segment_count, 256);
        assert_eq!(config.num_owners, 2);
        assert_eq!(config.stop_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SchedulerConfig::new()
            .with_segment_count(16)
            .with_num_owners(1)
            .with_stop_timeout(Duration::from_millis(500))
            .with_cancel_warn_threshold(Duration::from_millis(50))
            .with_worker_name("sessions");

        assert_eq!(config.segment_count, 16);
        assert_eq!(config.num_owners, 1);
        assert_eq!(config.stop_timeout, Duration::from_millis(500));
        assert_eq!(config.worker_name, "sessions");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        assert!(SchedulerConfig::new().with_segment_count(0).validate().is_err());
        assert!(SchedulerConfig::new().with_num_owners(0).validate().is_err());
        assert!(SchedulerConfig::new().with_worker_name("").validate().is_err());
    }
}
