//! Host readiness gate and the initialization poller that opens it.
//!
//! Startup is a one-shot transition: the [`InitPoller`] probes the
//! [`HostEnvironment`] on an interval, and on the first successful probe asks
//! the [`BackendFactory`] for the backend application. The created app is
//! published through the [`ReadinessGate`], after which services may
//! initialize. Later readiness signals are ignored.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use pollbridge_core::{AppOptions, BackendApp, BackendFactory, HostEnvironment};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;

// ---------------------------------------------------------------------------
// ReadinessGate
// ---------------------------------------------------------------------------

/// State published by a [`ReadinessGate`].
#[derive(Clone)]
enum GateState {
    Pending,
    Ready(Arc<dyn BackendApp>),
    GaveUp { attempts: u32 },
}

/// The gate closed for good without a backend app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReadinessError {
    #[error("host never became ready after {attempts} probes")]
    GaveUp { attempts: u32 },
}

/// One-shot "host ready" signal carrying the created backend app.
///
/// The gate leaves `Pending` exactly once: either it opens with an app or
/// the initialization poller gives up. Both outcomes are final.
pub struct ReadinessGate {
    state: watch::Sender<GateState>,
}

impl ReadinessGate {
    /// Creates a closed gate.
    #[must_use]
    pub fn new() -> Self {
        let (state, _rx) = watch::channel(GateState::Pending);
        Self { state }
    }

    /// Opens the gate with `app`.
    ///
    /// Returns `false` and changes nothing if the gate already left `Pending`.
    pub fn mark_ready(&self, app: Arc<dyn BackendApp>) -> bool {
        self.settle(GateState::Ready(app))
    }

    /// Closes the gate for good after `attempts` failed probes.
    ///
    /// Returns `false` and changes nothing if the gate already left `Pending`.
    pub fn give_up(&self, attempts: u32) -> bool {
        self.settle(GateState::GaveUp { attempts })
    }

    fn settle(&self, next: GateState) -> bool {
        let mut candidate = Some(next);
        self.state.send_if_modified(|current| {
            if !matches!(current, GateState::Pending) {
                return false;
            }
            if let Some(next) = candidate.take() {
                *current = next;
            }
            true
        })
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(*self.state.borrow(), GateState::Ready(_))
    }

    /// Returns `true` once the gate left `Pending`, open or not.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(*self.state.borrow(), GateState::Pending)
    }

    /// The backend app, once the gate is open.
    #[must_use]
    pub fn app(&self) -> Option<Arc<dyn BackendApp>> {
        match &*self.state.borrow() {
            GateState::Ready(app) => Some(Arc::clone(app)),
            GateState::Pending | GateState::GaveUp { .. } => None,
        }
    }

    /// Waits until the gate leaves `Pending`.
    ///
    /// # Errors
    ///
    /// Returns [`ReadinessError::GaveUp`] if initialization was abandoned.
    pub async fn wait_ready(&self) -> Result<Arc<dyn BackendApp>, ReadinessError> {
        let mut rx = self.state.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                GateState::Ready(app) => return Ok(app),
                GateState::GaveUp { attempts } => return Err(ReadinessError::GaveUp { attempts }),
                GateState::Pending => {}
            }
            // The sender is owned by `self`, so `changed` only returns once a value is sent.
            let _ = rx.changed().await;
        }
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// InitPoller
// ---------------------------------------------------------------------------

/// Outcome of a single readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The host is not ready yet.
    HostNotReady,
    /// The host is ready but the backend app could not be created.
    FactoryFailed,
    /// The app was created and the gate opened by this probe.
    Ready,
    /// The gate had already left `Pending`; nothing was done.
    AlreadyReady,
}

/// Everything a readiness probe needs.
#[derive(Clone)]
pub struct ProbeContext {
    pub gate: Arc<ReadinessGate>,
    pub host: Arc<dyn HostEnvironment>,
    pub factory: Arc<dyn BackendFactory>,
    pub options: AppOptions,
}

impl ProbeContext {
    /// Runs one probe: checks the host and, if ready, creates the app.
    pub fn probe(&self) -> ProbeOutcome {
        if self.gate.is_settled() {
            return ProbeOutcome::AlreadyReady;
        }
        if !self.host.is_host_ready() {
            debug!("host not ready");
            return ProbeOutcome::HostNotReady;
        }
        match self.factory.create_app(&self.options) {
            Ok(app) => {
                let name = app.name().to_string();
                if self.gate.mark_ready(app) {
                    info!(app = %name, "backend app created; bridge ready");
                    ProbeOutcome::Ready
                } else {
                    ProbeOutcome::AlreadyReady
                }
            }
            Err(err) => {
                warn!(error = %err, "backend app creation failed; will retry");
                ProbeOutcome::FactoryFailed
            }
        }
    }
}

/// Periodic task probing the host until the gate opens.
pub struct InitPoller {
    attempts: Arc<AtomicU32>,
    handle: Option<JoinHandle<()>>,
}

impl InitPoller {
    /// Starts probing on the current tokio runtime.
    ///
    /// The first probe runs immediately, then every `init_interval_ms`. The
    /// task stops once the gate is open or `init_attempt_limit` probes failed.
    #[must_use]
    pub fn start(ctx: ProbeContext, config: &BridgeConfig) -> Self {
        let attempts = Arc::new(AtomicU32::new(0));
        let task_attempts = Arc::clone(&attempts);
        let interval = config.init_interval();
        let limit = config.init_attempt_limit;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let attempt = task_attempts.fetch_add(1, Ordering::Relaxed) + 1;
                match ctx.probe() {
                    ProbeOutcome::Ready | ProbeOutcome::AlreadyReady => break,
                    ProbeOutcome::HostNotReady | ProbeOutcome::FactoryFailed => {}
                }
                if limit.is_some_and(|limit| attempt >= limit) {
                    warn!(attempts = attempt, "host never became ready; giving up");
                    ctx.gate.give_up(attempt);
                    break;
                }
            }
        });

        Self {
            attempts,
            handle: Some(handle),
        }
    }

    /// Number of probes run so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Returns `true` once the probing task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stops probing.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for InitPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
