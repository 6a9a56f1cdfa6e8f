//! Service lifecycle state.
//!
//! Uses `ArcSwap` so request objects can check readiness on every call
//! without contending with the initializing task.

use std::sync::Arc;

use arc_swap::ArcSwap;

/// Lifecycle state of a backend service.
///
/// State machine: Uninitialized -> Initializing -> Ready -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Created; waiting for the readiness gate.
    Uninitialized,
    /// `init` is running.
    Initializing,
    /// Backend acquired; requests may issue calls.
    Ready,
    /// Shut down; requests are rejected.
    Stopped,
}

/// Shared, lock-free holder for a [`ServiceState`].
#[derive(Debug)]
pub struct ServiceLifecycle {
    state: ArcSwap<ServiceState>,
}

impl ServiceLifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(ServiceState::Uninitialized),
        }
    }

    #[must_use]
    pub fn get(&self) -> ServiceState {
        **self.state.load()
    }

    pub fn set(&self, state: ServiceState) {
        self.state.store(Arc::new(state));
    }

    /// Moves `Uninitialized` to `Initializing`.
    ///
    /// Returns `false` (and changes nothing) from any other state, so only
    /// one caller runs initialization.
    pub fn begin_init(&self) -> bool {
        let previous = self.state.rcu(|current| match **current {
            ServiceState::Uninitialized => ServiceState::Initializing,
            other => other,
        });
        *previous == ServiceState::Uninitialized
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.get() == ServiceState::Ready
    }
}

impl Default for ServiceLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
