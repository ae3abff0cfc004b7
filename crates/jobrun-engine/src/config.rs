//! Engine configuration.

use std::time::Duration;

use jobrun_core::ExecutionClass;

/// Expiration applied when the configured timeout is zero.
pub const DEFAULT_RESOURCE_EXPIRATION: Duration = Duration::from_secs(5 * 60);

/// Default time a synchronous caller waits for a worker slot.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time terminal tasks stay listable.
pub const DEFAULT_TASK_RETENTION: Duration = Duration::from_secs(60 * 60);

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Engine configuration.
///
/// The engine keeps its own copy behind a lock; changes made through
/// `JobEngine::update_config` are picked up on the next admission decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum synchronous-class tasks running at once (0 = available parallelism).
    pub max_synchronous_processes: usize,

    /// Maximum asynchronous-class tasks running at once (0 = available parallelism).
    pub max_asynchronous_processes: usize,

    /// How long produced results stay fetchable after completion (0 = five minutes).
    pub resource_expiration_timeout: Duration,

    /// How long a bounded synchronous submission waits for a worker slot.
    pub connection_timeout: Duration,

    /// How long terminal tasks stay in the registry.
    pub task_retention: Duration,

    /// Reaper cadence; derived from the expiration timeout when unset.
    pub sweep_interval: Option<Duration>,

    /// Delete artifact files and directories when their result entry is evicted.
    pub purge_artifacts: bool,
}

impl EngineConfig {
    /// Effective quota for an execution class.
    pub fn capacity(&self, class: ExecutionClass) -> usize {
        let configured = match class {
            ExecutionClass::Sync => self.max_synchronous_processes,
            ExecutionClass::Async => self.max_asynchronous_processes,
        };
        if configured == 0 {
            available_parallelism()
        } else {
            configured
        }
    }

    /// Effective result expiration timeout.
    pub fn resource_expiration(&self) -> Duration {
        if self.resource_expiration_timeout.is_zero() {
            DEFAULT_RESOURCE_EXPIRATION
        } else {
            self.resource_expiration_timeout
        }
    }

    /// Effective reaper cadence.
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
            .unwrap_or_else(|| self.resource_expiration() / 4)
            .clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cores = available_parallelism();
        Self {
            max_synchronous_processes: cores,
            max_asynchronous_processes: cores,
            resource_expiration_timeout: DEFAULT_RESOURCE_EXPIRATION,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            task_retention: DEFAULT_TASK_RETENTION,
            sweep_interval: None,
            purge_artifacts: true,
        }
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_cpu_count() {
        let config = EngineConfig::default();
        assert!(config.max_synchronous_processes >= 1);
        assert_eq!(
            config.max_synchronous_processes,
            config.max_asynchronous_processes
        );
        assert_eq!(config.resource_expiration(), DEFAULT_RESOURCE_EXPIRATION);
    }

    #[test]
    fn test_zero_capacity_means_cpu_count() {
        let config = EngineConfig {
            max_synchronous_processes: 0,
            max_asynchronous_processes: 3,
            ..EngineConfig::default()
        };
        assert_eq!(config.capacity(ExecutionClass::Sync), available_parallelism());
        assert_eq!(config.capacity(ExecutionClass::Async), 3);
    }

    #[test]
    fn test_zero_expiration_uses_five_minutes() {
        let config = EngineConfig {
            resource_expiration_timeout: Duration::ZERO,
            ..EngineConfig::default()
        };
        assert_eq!(config.resource_expiration(), Duration::from_secs(300));
    }

    #[test]
    fn test_sweep_interval_is_clamped() {
        let short = EngineConfig {
            resource_expiration_timeout: Duration::from_millis(40),
            ..EngineConfig::default()
        };
        assert_eq!(short.sweep_interval(), Duration::from_millis(100));

        let long = EngineConfig {
            resource_expiration_timeout: Duration::from_secs(3600),
            ..EngineConfig::default()
        };
        assert_eq!(long.sweep_interval(), Duration::from_secs(60));

        let explicit = EngineConfig {
            sweep_interval: Some(Duration::from_secs(2)),
            ..EngineConfig::default()
        };
        assert_eq!(explicit.sweep_interval(), Duration::from_secs(2));
    }
}
