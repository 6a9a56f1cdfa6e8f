//! Bounded blocking wait for a single handle.
//!
//! Public helper for embedders that must resolve one handle synchronously,
//! typically while probing a backend before any tokio runtime exists. The
//! bridge itself never blocks; its normal path is registration and the
//! completion poller.

use std::thread;
use std::time::Duration;

use pollbridge_core::{OperationHandle, OperationStatus};
use tracing::{debug, warn};

use crate::config::BridgeConfig;

/// Polling parameters for [`block_until_settled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    /// Sleep between status checks.
    pub poll: Duration,
    /// Number of checks before giving up.
    pub budget: u32,
    /// Log progress every this many checks. 0 disables progress logs.
    pub log_every: u32,
}

impl From<&BridgeConfig> for WaitConfig {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            poll: Duration::from_millis(config.wait_poll_ms),
            budget: config.wait_iteration_budget,
            log_every: config.wait_log_every,
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

/// Blocks the calling thread until `handle` settles or the budget runs out.
///
/// Returns the last observed status, which is still `Pending` when the
/// budget was exhausted.
pub fn block_until_settled(handle: &OperationHandle, config: &WaitConfig) -> OperationStatus {
    debug!(status = %handle.status(), "waiting for operation");
    let mut checks = 0;
    while handle.status().is_pending() {
        if checks >= config.budget {
            warn!(checks, "operation still pending; giving up wait");
            break;
        }
        checks += 1;
        if config.log_every > 0 && checks % config.log_every == 0 {
            debug!(checks, "operation still pending");
        }
        thread::yield_now();
        thread::sleep(config.poll);
    }

    let status = handle.status();
    debug!(%status, checks, "wait ended");
    status
}
