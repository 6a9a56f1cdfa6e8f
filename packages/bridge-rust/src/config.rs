//! Bridge-level configuration.

use std::time::Duration;

/// Lower bound for timer periods; tokio intervals reject a zero period.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the correlation engine and its startup probing.
///
/// Intervals are tuning parameters: correctness never depends on them.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Interval between completion scans while operations are in flight.
    pub poll_interval_ms: u64,
    /// Interval between host readiness probes during startup.
    pub init_interval_ms: u64,
    /// Maximum number of readiness probes. `None` probes until the host is ready.
    pub init_attempt_limit: Option<u32>,
    /// Sleep between status checks in the bounded wait helper.
    pub wait_poll_ms: u64,
    /// Status checks the bounded wait helper performs before giving up.
    pub wait_iteration_budget: u32,
    /// The bounded wait helper logs progress every this many checks.
    pub wait_log_every: u32,
    /// Capacity of each request's event broadcast channel.
    pub event_channel_capacity: usize,
    /// Root of every service prefix (e.g. `"pollbridge"` -> `"pollbridge.storage."`).
    pub id_prefix: String,
}

impl BridgeConfig {
    /// Scan interval. Never shorter than [`MIN_INTERVAL`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms).max(MIN_INTERVAL)
    }

    /// Probe interval. Never shorter than [`MIN_INTERVAL`].
    #[must_use]
    pub fn init_interval(&self) -> Duration {
        Duration::from_millis(self.init_interval_ms).max(MIN_INTERVAL)
    }

    /// Identifier prefix for the service called `service`.
    #[must_use]
    pub fn service_prefix(&self, service: &str) -> String {
        format!("{}.{}.", self.id_prefix, service)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            init_interval_ms: 1000,
            init_attempt_limit: None,
            wait_poll_ms: 10,
            wait_iteration_budget: 200,
            wait_log_every: 100,
            event_channel_capacity: 64,
            id_prefix: "pollbridge".to_string(),
        }
    }
}
