//! Pollable operation handles.
//!
//! An [`OperationHandle`] stands for one asynchronous backend call. It exposes
//! nothing but a status query and, once settled, the call's error code,
//! error message and output. There is no notification mechanism: whoever is
//! interested in the outcome has to poll [`OperationHandle::status`].
//!
//! The backend side keeps the matching [`OperationCompleter`] and settles the
//! handle exactly once. A completer dropped without settling marks the handle
//! [`OperationStatus::Invalid`], so an abandoned call never stays pending.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::storage::ObjectMetadata;

/// Error code reported by a handle that carries no backend error.
pub const ERROR_NONE: i32 = 0;

/// Lifecycle status of an operation handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    /// The call has not finished yet.
    Pending,
    /// The call finished. It may still carry a backend error code.
    Complete,
    /// The call was abandoned or the handle never referred to a live call.
    Invalid,
}

impl OperationStatus {
    /// Returns `true` while the operation is still in flight.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// Result payload produced by a successful call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationOutput {
    /// The call produces no value (e.g. delete).
    Unit,
    /// A string result (download URL, instance id).
    Text(String),
    /// Metadata of a written storage object.
    Metadata(ObjectMetadata),
}

#[derive(Debug)]
struct HandleSlot {
    status: OperationStatus,
    error_code: i32,
    error_message: String,
    output: Option<OperationOutput>,
}

impl HandleSlot {
    fn pending() -> Self {
        Self {
            status: OperationStatus::Pending,
            error_code: ERROR_NONE,
            error_message: String::new(),
            output: None,
        }
    }
}

/// Cheaply clonable token for one in-flight backend call.
///
/// All clones observe the same underlying call. Once the status has left
/// `Pending` the handle never changes again.
#[derive(Debug, Clone)]
pub struct OperationHandle {
    slot: Arc<RwLock<HandleSlot>>,
}

impl OperationHandle {
    /// Creates a pending handle together with the completer that settles it.
    #[must_use]
    pub fn pending() -> (Self, OperationCompleter) {
        let slot = Arc::new(RwLock::new(HandleSlot::pending()));
        let handle = Self {
            slot: Arc::clone(&slot),
        };
        (handle, OperationCompleter { slot })
    }

    /// Creates a handle that is already complete with the given output.
    #[must_use]
    pub fn completed(output: OperationOutput) -> Self {
        let (handle, completer) = Self::pending();
        completer.complete(output);
        handle
    }

    /// Creates a handle that is already complete with a backend error.
    #[must_use]
    pub fn failed(code: i32, message: impl Into<String>) -> Self {
        let (handle, completer) = Self::pending();
        completer.fail(code, message);
        handle
    }

    /// Creates a handle in the `Invalid` state.
    #[must_use]
    pub fn invalid() -> Self {
        let (handle, completer) = Self::pending();
        completer.invalidate();
        handle
    }

    /// Current status of the call.
    #[must_use]
    pub fn status(&self) -> OperationStatus {
        self.slot.read().status
    }

    /// Backend error code, [`ERROR_NONE`] when the call reported no error.
    #[must_use]
    pub fn error(&self) -> i32 {
        self.slot.read().error_code
    }

    /// Backend error message, empty when the call reported no error.
    #[must_use]
    pub fn error_message(&self) -> String {
        self.slot.read().error_message.clone()
    }

    /// Output of a successful call. `None` while pending or on failure.
    #[must_use]
    pub fn output(&self) -> Option<OperationOutput> {
        self.slot.read().output.clone()
    }

    /// Convenience accessor for string outputs.
    #[must_use]
    pub fn text_output(&self) -> Option<String> {
        match self.output() {
            Some(OperationOutput::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// Returns `true` if both handles refer to the same call.
    #[must_use]
    pub fn same_call(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

/// Backend-side half of an operation handle.
///
/// Each settle method consumes the completer, so a call settles at most once.
#[derive(Debug)]
pub struct OperationCompleter {
    slot: Arc<RwLock<HandleSlot>>,
}

impl OperationCompleter {
    /// Settles the call as complete with `output`.
    ///
    /// Returns `false` if the handle was already settled.
    pub fn complete(self, output: OperationOutput) -> bool {
        self.settle(OperationStatus::Complete, ERROR_NONE, String::new(), Some(output))
    }

    /// Settles the call as complete with a backend error.
    ///
    /// Returns `false` if the handle was already settled.
    pub fn fail(self, code: i32, message: impl Into<String>) -> bool {
        self.settle(OperationStatus::Complete, code, message.into(), None)
    }

    /// Settles the call as invalid.
    ///
    /// Returns `false` if the handle was already settled.
    pub fn invalidate(self) -> bool {
        self.settle(OperationStatus::Invalid, ERROR_NONE, String::new(), None)
    }

    fn settle(
        &self,
        status: OperationStatus,
        error_code: i32,
        error_message: String,
        output: Option<OperationOutput>,
    ) -> bool {
        let mut slot = self.slot.write();
        if !slot.status.is_pending() {
            return false;
        }
        slot.status = status;
        slot.error_code = error_code;
        slot.error_message = error_message;
        slot.output = output;
        true
    }
}

impl Drop for OperationCompleter {
    fn drop(&mut self) {
        let mut slot = self.slot.write();
        if slot.status.is_pending() {
            trace!("completer dropped while pending; handle invalidated");
            slot.status = OperationStatus::Invalid;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_handle_reports_pending_until_completed() {
        let (handle, completer) = OperationHandle::pending();
        assert_eq!(handle.status(), OperationStatus::Pending);
        assert!(handle.output().is_none());

        assert!(completer.complete(OperationOutput::Text("gs://a".to_string())));
        assert_eq!(handle.status(), OperationStatus::Complete);
        assert_eq!(handle.error(), ERROR_NONE);
        assert_eq!(handle.text_output().as_deref(), Some("gs://a"));
    }

    #[test]
    fn clones_observe_the_same_call() {
        let (handle, completer) = OperationHandle::pending();
        let copy = handle.clone();
        assert!(copy.same_call(&handle));

        completer.fail(7, "denied");
        assert_eq!(copy.status(), OperationStatus::Complete);
        assert_eq!(copy.error(), 7);
        assert_eq!(copy.error_message(), "denied");
        assert!(copy.output().is_none());
    }

    #[test]
    fn dropped_completer_invalidates_pending_handle() {
        let (handle, completer) = OperationHandle::pending();
        drop(completer);
        assert_eq!(handle.status(), OperationStatus::Invalid);
    }

    #[test]
    fn settled_handle_is_not_overwritten_on_drop() {
        let (handle, completer) = OperationHandle::pending();
        completer.complete(OperationOutput::Unit);
        assert_eq!(handle.status(), OperationStatus::Complete);
        assert_eq!(handle.output(), Some(OperationOutput::Unit));
    }

    #[test]
    fn ready_made_constructors() {
        assert_eq!(
            OperationHandle::completed(OperationOutput::Unit).status(),
            OperationStatus::Complete
        );
        let failed = OperationHandle::failed(2, "missing");
        assert_eq!(failed.status(), OperationStatus::Complete);
        assert_eq!(failed.error(), 2);
        assert_eq!(OperationHandle::invalid().status(), OperationStatus::Invalid);
    }

    #[test]
    fn status_display() {
        assert_eq!(OperationStatus::Pending.to_string(), "pending");
        assert_eq!(OperationStatus::Invalid.to_string(), "invalid");
        assert!(!OperationStatus::Complete.is_pending());
    }
}
