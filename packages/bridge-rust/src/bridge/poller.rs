//! Completion poller task.
//!
//! Backend handles offer no completion callback, only a status query, so the
//! bridge scans its registry on a fixed interval. The poller is a tokio task
//! that exists only while the registry holds entries: it is spawned by the
//! registration that finds the registry empty and exits after the scan that
//! drains it.

use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::Bridge;

/// Activity state of the completion poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// No operations in flight; no scan is scheduled.
    Inactive,
    /// At least one operation is in flight; scans run every interval.
    Active,
}

/// Result of one timer-driven scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    Continue,
    Stop,
}

/// Spawns the scan loop for poller `generation`.
///
/// The task holds only a weak reference to the bridge and stops when the
/// bridge is dropped, when a scan drains the registry, or when a newer
/// generation has taken over.
pub(crate) fn spawn(
    runtime: &Handle,
    bridge: Weak<Bridge>,
    generation: u64,
    interval: Duration,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        debug!(generation, "completion poller started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick: a freshly registered call is never settled yet.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(bridge) = bridge.upgrade() else {
                break;
            };
            if bridge.scan_tick(generation) == TickOutcome::Stop {
                break;
            }
        }
        debug!(generation, "completion poller stopped");
    })
}
