//! Shared request plumbing: phases, events, errors and outcome resolution.
//!
//! Both storage and instance-id requests are small state machines over
//! [`RequestPhase`]. Transitions that are not allowed from the current phase
//! are rejected with a [`RequestError`] and leave the request untouched.

use pollbridge_core::{OperationHandle, OperationOutput, OperationStatus, ERROR_NONE};
use tokio::sync::broadcast;
use tracing::debug;

/// Phase of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    /// Nothing staged, nothing in flight. Outcome of the last action is readable.
    Idle,
    /// A target is staged; exactly one action may now be issued.
    Staged,
    /// One action is in flight.
    Running,
}

impl RequestPhase {
    /// Staging is allowed from any phase except `Running`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::AlreadyRunning`] while an action is in flight.
    pub fn check_stage(self) -> Result<(), RequestError> {
        match self {
            Self::Running => Err(RequestError::AlreadyRunning),
            Self::Idle | Self::Staged => Ok(()),
        }
    }

    /// Staged actions are allowed only from `Staged`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::AlreadyRunning`] or [`RequestError::NotStaged`].
    pub fn check_action(self) -> Result<(), RequestError> {
        match self {
            Self::Staged => Ok(()),
            Self::Running => Err(RequestError::AlreadyRunning),
            Self::Idle => Err(RequestError::NotStaged),
        }
    }
}

/// Notification emitted by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestEvent {
    /// `running()` changed.
    RunningChanged { running: bool },
    /// The in-flight action resolved.
    Completed { success: bool },
}

/// A rejected request transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("an action is already running")]
    AlreadyRunning,
    #[error("no target staged")]
    NotStaged,
    #[error("{service} service is not ready")]
    ServiceNotReady { service: &'static str },
}

/// Error code and message of the last action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorState {
    pub code: i32,
    pub message: String,
}

impl ErrorState {
    #[must_use]
    pub fn none() -> Self {
        Self {
            code: ERROR_NONE,
            message: String::new(),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.code != ERROR_NONE
    }
}

impl Default for ErrorState {
    fn default() -> Self {
        Self::none()
    }
}

/// How a settled handle resolves for the request that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    Failed(ErrorState),
    Succeeded(Option<OperationOutput>),
}

/// Interprets a settled handle.
///
/// A handle that did not complete maps to `unknown_code` without message; a
/// completed handle carrying a backend error keeps code and message verbatim.
pub(crate) fn resolve(handle: &OperationHandle, unknown_code: i32) -> Resolution {
    let status = handle.status();
    if status != OperationStatus::Complete {
        debug!(%status, "action failed with non-complete status");
        return Resolution::Failed(ErrorState {
            code: unknown_code,
            message: String::new(),
        });
    }
    let code = handle.error();
    if code != ERROR_NONE {
        let message = handle.error_message();
        debug!(code, %message, "backend reported error");
        return Resolution::Failed(ErrorState { code, message });
    }
    Resolution::Succeeded(handle.output())
}

/// Broadcast sender for request events.
#[derive(Debug)]
pub(crate) struct RequestEvents {
    tx: broadcast::Sender<RequestEvent>,
}

impl RequestEvents {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<RequestEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: RequestEvent) {
        // No receivers is fine: nobody is listening to this request.
        let _ = self.tx.send(event);
    }

    /// Emits the running->idle edge.
    pub(crate) fn finished(&self, success: bool) {
        self.emit(RequestEvent::RunningChanged { running: false });
        self.emit(RequestEvent::Completed { success });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_guards() {
        assert!(RequestPhase::Idle.check_stage().is_ok());
        assert!(RequestPhase::Staged.check_stage().is_ok());
        assert_eq!(
            RequestPhase::Running.check_stage(),
            Err(RequestError::AlreadyRunning)
        );

        assert!(RequestPhase::Staged.check_action().is_ok());
        assert_eq!(
            RequestPhase::Idle.check_action(),
            Err(RequestError::NotStaged)
        );
        assert_eq!(
            RequestPhase::Running.check_action(),
            Err(RequestError::AlreadyRunning)
        );
    }

    #[test]
    fn resolve_maps_invalid_status_to_unknown() {
        let resolution = resolve(&OperationHandle::invalid(), 1);
        assert_eq!(
            resolution,
            Resolution::Failed(ErrorState {
                code: 1,
                message: String::new()
            })
        );
    }

    #[test]
    fn resolve_keeps_backend_error_verbatim() {
        let resolution = resolve(&OperationHandle::failed(7, "no permission"), 1);
        assert_eq!(
            resolution,
            Resolution::Failed(ErrorState {
                code: 7,
                message: "no permission".to_string()
            })
        );
    }

    #[test]
    fn resolve_passes_output_through() {
        let handle = OperationHandle::completed(OperationOutput::Text("u".to_string()));
        assert_eq!(
            resolve(&handle, 1),
            Resolution::Succeeded(Some(OperationOutput::Text("u".to_string())))
        );
    }

    #[test]
    fn finished_emits_edge_then_completion() {
        let events = RequestEvents::new(4);
        let mut rx = events.subscribe();
        events.finished(false);

        assert_eq!(
            rx.try_recv().unwrap(),
            RequestEvent::RunningChanged { running: false }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            RequestEvent::Completed { success: false }
        );
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            RequestError::ServiceNotReady { service: "storage" }.to_string(),
            "storage service is not ready"
        );
        assert!(!ErrorState::none().is_error());
    }
}
