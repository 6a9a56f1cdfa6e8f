//! The bridge: operation registry, completion poller and event fan-out.
//!
//! Backend calls hand back pollable handles. Components register each handle
//! under an identifier with [`Bridge::register`]; the poller scans the
//! registry, removes settled entries and emits `(identifier, handle)` to every
//! [`CompletionObserver`] attached via [`Bridge::subscribe`]. Each registered
//! operation is emitted at most once, and only after it left `Pending`.
//!
//! The bridge is built once by the composition root and shared as
//! `Arc<Bridge>`. Its backend app becomes available through the
//! [`ReadinessGate`] it is constructed with.

pub mod observer;
pub mod poller;
pub mod readiness;
pub mod registry;
pub mod wait;

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use pollbridge_core::{BackendApp, OperationHandle};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use observer::{CompletionObserver, Subscription};
pub use poller::PollerState;
pub use readiness::{InitPoller, ProbeContext, ProbeOutcome, ReadinessError, ReadinessGate};
pub use registry::OperationRegistry;
pub use wait::{block_until_settled, WaitConfig};

use crate::config::BridgeConfig;
use observer::ObserverList;
use poller::TickOutcome;

/// Process-wide owner of the operation registry and completion poller.
pub struct Bridge {
    poll_interval: Duration,
    gate: Arc<ReadinessGate>,
    registry: OperationRegistry,
    observers: Arc<ObserverList>,
    runtime: Option<Handle>,
    poller_task: Mutex<Option<(u64, JoinHandle<()>)>>,
    me: Weak<Bridge>,
}

impl Bridge {
    /// Creates the bridge.
    ///
    /// When called inside a tokio runtime, the poller runs on that runtime.
    /// Otherwise no poller is ever spawned and settled operations are only
    /// dispatched by explicit [`poll_once`](Self::poll_once) calls.
    #[must_use]
    pub fn new(config: &BridgeConfig, gate: Arc<ReadinessGate>) -> Arc<Self> {
        let runtime = Handle::try_current().ok();
        Arc::new_cyclic(|me| Self {
            poll_interval: config.poll_interval(),
            gate,
            registry: OperationRegistry::new(),
            observers: Arc::new(ObserverList::default()),
            runtime,
            poller_task: Mutex::new(None),
            me: me.clone(),
        })
    }

    /// Returns `true` once the host became ready and the backend app exists.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    /// The backend app, once ready.
    #[must_use]
    pub fn app(&self) -> Option<Arc<dyn BackendApp>> {
        self.gate.app()
    }

    #[must_use]
    pub fn readiness(&self) -> &Arc<ReadinessGate> {
        &self.gate
    }

    /// Registers an in-flight operation under `identifier`.
    ///
    /// An identifier that is already registered is overwritten: the earlier
    /// operation will never be dispatched. Starts the poller if it was
    /// inactive.
    pub fn register(&self, identifier: impl Into<String>, handle: OperationHandle) {
        let identifier = identifier.into();
        debug!(%identifier, "registering operation");

        let insertion = self.registry.insert(identifier.clone(), handle);
        if insertion.replaced {
            warn!(
                %identifier,
                "operation registry already contains identifier; earlier operation is orphaned"
            );
        }
        if let Some(generation) = insertion.start_generation {
            self.start_poller(generation);
        }
    }

    /// Attaches `observer` to the completion stream.
    pub fn subscribe(&self, observer: Arc<dyn CompletionObserver>) -> Subscription {
        let id = self.observers.add(observer);
        Subscription::new(id, &self.observers)
    }

    /// Runs one scan now and dispatches every settled operation.
    ///
    /// Returns the number of completion events emitted.
    pub fn poll_once(&self) -> usize {
        let sweep = self.registry.sweep(None);
        if sweep.drained {
            debug!("operation registry drained; poller inactive");
        }
        self.dispatch(sweep.settled)
    }

    pub(crate) fn scan_tick(&self, generation: u64) -> TickOutcome {
        let sweep = self.registry.sweep(Some(generation));
        if sweep.stale {
            return TickOutcome::Stop;
        }
        let drained = sweep.drained;
        self.dispatch(sweep.settled);
        if drained {
            debug!(generation, "operation registry drained; poller inactive");
            TickOutcome::Stop
        } else {
            TickOutcome::Continue
        }
    }

    fn dispatch(&self, settled: Vec<(String, OperationHandle)>) -> usize {
        let count = settled.len();
        for (identifier, handle) in settled {
            debug!(%identifier, status = %handle.status(), "operation settled");
            self.observers.notify(&identifier, &handle);
        }
        count
    }

    fn start_poller(&self, generation: u64) {
        let Some(runtime) = &self.runtime else {
            warn!("no tokio runtime; settled operations are only dispatched by poll_once");
            self.registry.deactivate(generation);
            return;
        };
        let task = poller::spawn(runtime, self.me.clone(), generation, self.poll_interval);
        let mut slot = self.poller_task.lock();
        if slot.as_ref().is_some_and(|(current, _)| *current > generation) {
            // A newer generation started while this one was being spawned.
            debug!(generation, "poller superseded before start");
            task.abort();
            return;
        }
        if let Some((_, previous)) = slot.replace((generation, task)) {
            // A stale generation exits on its next tick; stop it now instead.
            previous.abort();
        }
    }

    /// Number of operations still in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn is_registered(&self, identifier: &str) -> bool {
        self.registry.contains(identifier)
    }

    #[must_use]
    pub fn poller_state(&self) -> PollerState {
        if self.registry.is_poller_active() {
            PollerState::Active
        } else {
            PollerState::Inactive
        }
    }

    /// Number of attached completion observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Stops the poller. In-flight entries stay registered and are dispatched
    /// again by the next registration or [`poll_once`](Self::poll_once).
    pub fn shutdown(&self) {
        self.registry.deactivate_all();
        if let Some((_, task)) = self.poller_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Some((_, task)) = self.poller_task.get_mut().take() {
            task.abort();
        }
    }
}
