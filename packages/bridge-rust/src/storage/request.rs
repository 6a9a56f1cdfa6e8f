//! Staged storage requests.
//!
//! ```text
//!            stage(path)            write/remove/fetch_url
//!   Idle ────────────────► Staged ─────────────────────────► Running
//!    ▲  ▲                   │  ▲                               │
//!    │  └── stage(path) ────┘  └── stage(path)                 │
//!    └──────────────────── completion ─────────────────────────┘
//! ```

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use pollbridge_core::{
    OperationHandle, OperationOutput, StorageBackend, StorageErrorCode, StorageRef,
};
use tokio::sync::broadcast;
use tracing::debug;

use super::service::StorageService;
use crate::request::{
    resolve, ErrorState, RequestError, RequestEvent, RequestEvents, RequestPhase, Resolution,
};
use crate::service::{CompletionTarget, OwnerId};

/// Storage actions. Each kind is submitted under one fixed identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageAction {
    Save,
    GetUrl,
    Delete,
}

impl StorageAction {
    /// Identifier suffix this action is submitted under.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::GetUrl => "getUrl",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug)]
struct RequestState {
    phase: RequestPhase,
    target: Option<StorageRef>,
    action: Option<StorageAction>,
    error: ErrorState,
    download_url: String,
}

/// Shared half of a request. The façade only ever holds it weakly.
struct RequestShared {
    owner: OwnerId,
    service: Arc<StorageService>,
    state: Mutex<RequestState>,
    events: RequestEvents,
}

impl CompletionTarget for RequestShared {
    fn on_operation_complete(&self, action_id: &str, handle: &OperationHandle) {
        let success = {
            let mut state = self.state.lock();
            match resolve(handle, StorageErrorCode::Unknown.code()) {
                Resolution::Failed(error) => state.error = error,
                Resolution::Succeeded(output) => {
                    if action_id == StorageAction::GetUrl.id() {
                        state.download_url = match output {
                            Some(OperationOutput::Text(url)) => url,
                            _ => String::new(),
                        };
                    }
                }
            }
            let was_running = state.phase == RequestPhase::Running;
            state.phase = RequestPhase::Idle;
            state.action = None;
            if !was_running {
                return;
            }
            !state.error.is_error()
        };
        debug!(owner = self.owner.0, action = action_id, success, "storage request completed");
        self.events.finished(success);
    }
}

/// One composable storage operation.
///
/// Dropping the request unregisters it from the storage façade: a completion
/// that arrives afterwards is discarded.
pub struct StorageRequest {
    shared: Arc<RequestShared>,
}

impl StorageRequest {
    pub(crate) fn new(service: Arc<StorageService>, event_capacity: usize) -> Self {
        let owner = service.facade().allocate_owner();
        Self {
            shared: Arc::new(RequestShared {
                owner,
                service,
                state: Mutex::new(RequestState {
                    phase: RequestPhase::Idle,
                    target: None,
                    action: None,
                    error: ErrorState::none(),
                    download_url: String::new(),
                }),
                events: RequestEvents::new(event_capacity),
            }),
        }
    }

    /// Selects the target for the next action. The empty path is the root.
    ///
    /// Clears the error of the previous action.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::AlreadyRunning`] while an action is in flight,
    /// [`RequestError::ServiceNotReady`] before the storage service is ready.
    pub fn stage(&self, path: &str) -> Result<&Self, RequestError> {
        let mut state = self.shared.state.lock();
        state.phase.check_stage()?;
        let backend = self.shared.service.ready_backend()?;
        state.target = Some(backend.reference(path));
        state.phase = RequestPhase::Staged;
        state.error = ErrorState::none();
        Ok(self)
    }

    /// Uploads `data` to the staged target.
    ///
    /// # Errors
    ///
    /// Returns a [`RequestError`] if no target is staged, an action is
    /// running or the service is not ready.
    pub fn write_bytes(&self, data: impl Into<Bytes>) -> Result<(), RequestError> {
        let data = data.into();
        self.run(StorageAction::Save, move |backend, target| {
            backend.put_bytes(target, data)
        })
    }

    /// Uploads `text` (UTF-8) to the staged target.
    ///
    /// # Errors
    ///
    /// Same as [`write_bytes`](Self::write_bytes).
    pub fn write_text(&self, text: &str) -> Result<(), RequestError> {
        self.run(StorageAction::Save, |backend, target| {
            backend.put_text(target, text)
        })
    }

    /// Deletes the object at the staged target.
    ///
    /// # Errors
    ///
    /// Same as [`write_bytes`](Self::write_bytes).
    pub fn remove(&self) -> Result<(), RequestError> {
        self.run(StorageAction::Delete, |backend, target| backend.delete(target))
    }

    /// Fetches a download URL for the staged target. On success the URL is
    /// available from [`download_url`](Self::download_url).
    ///
    /// # Errors
    ///
    /// Same as [`write_bytes`](Self::write_bytes).
    pub fn fetch_url(&self) -> Result<(), RequestError> {
        self.run(StorageAction::GetUrl, |backend, target| {
            backend.download_url(target)
        })
    }

    fn run<F>(&self, action: StorageAction, call: F) -> Result<(), RequestError>
    where
        F: FnOnce(&dyn StorageBackend, &StorageRef) -> OperationHandle,
    {
        let (backend, target) = {
            let mut state = self.shared.state.lock();
            state.phase.check_action()?;
            let backend = self.shared.service.ready_backend()?;
            let target = state.target.take().ok_or(RequestError::NotStaged)?;
            state.phase = RequestPhase::Running;
            state.action = Some(action);
            (backend, target)
        };
        self.shared
            .events
            .emit(RequestEvent::RunningChanged { running: true });

        debug!(owner = self.shared.owner.0, action = action.id(), %target, "issuing storage call");
        let handle = call(backend.as_ref(), &target);
        let shared: Arc<dyn CompletionTarget> = self.shared.clone();
        self.shared.service.facade().submit(
            action.id(),
            self.shared.owner,
            Arc::downgrade(&shared),
            handle,
        );
        Ok(())
    }

    /// Subscribes to this request's events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RequestEvent> {
        self.shared.events.subscribe()
    }

    #[must_use]
    pub fn phase(&self) -> RequestPhase {
        self.shared.state.lock().phase
    }

    #[must_use]
    pub fn running(&self) -> bool {
        self.phase() == RequestPhase::Running
    }

    /// The staged target, if any.
    #[must_use]
    pub fn target(&self) -> Option<StorageRef> {
        self.shared.state.lock().target.clone()
    }

    /// The action in flight, if any.
    #[must_use]
    pub fn action(&self) -> Option<StorageAction> {
        self.shared.state.lock().action
    }

    /// Error code of the last action, `0` for none.
    #[must_use]
    pub fn error_id(&self) -> i32 {
        self.shared.state.lock().error.code
    }

    /// Typed error of the last action. `None` for unrecognized codes.
    #[must_use]
    pub fn error(&self) -> Option<StorageErrorCode> {
        StorageErrorCode::from_code(self.error_id())
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.shared.state.lock().error.is_error()
    }

    #[must_use]
    pub fn error_message(&self) -> String {
        self.shared.state.lock().error.message.clone()
    }

    /// URL produced by the last successful [`fetch_url`](Self::fetch_url).
    #[must_use]
    pub fn download_url(&self) -> String {
        self.shared.state.lock().download_url.clone()
    }
}

impl Drop for StorageRequest {
    fn drop(&mut self) {
        let removed = self.shared.service.facade().unregister(self.shared.owner);
        if removed > 0 {
            debug!(owner = self.shared.owner.0, removed, "dropped storage request with pending operation");
        }
    }
}

#[cfg(test)]
mod tests {
    use pollbridge_core::ObjectMetadata;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::backends::memory::{Latency, MemoryApp};
    use crate::bridge::{Bridge, ReadinessGate};
    use crate::config::BridgeConfig;
    use crate::service::{ManagedService, ServiceContext};

    struct Fixture {
        bridge: Arc<Bridge>,
        app: Arc<MemoryApp>,
        service: Arc<StorageService>,
    }

    async fn ready_fixture(latency: Latency) -> Fixture {
        let config = BridgeConfig::default();
        let gate = Arc::new(ReadinessGate::new());
        let app = Arc::new(MemoryApp::with_latency("test", latency));
        gate.mark_ready(app.clone());
        let bridge = Bridge::new(&config, Arc::clone(&gate));
        let service = StorageService::new(Arc::clone(&bridge), &config);
        service
            .init(&ServiceContext {
                config: Arc::new(config),
                readiness: gate,
            })
            .await
            .unwrap();
        Fixture {
            bridge,
            app,
            service,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<RequestEvent>) -> Vec<RequestEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return events,
                Err(TryRecvError::Lagged(_)) => {}
            }
        }
    }

    #[tokio::test]
    async fn new_request_is_idle_without_error() {
        let fx = ready_fixture(Latency::Immediate).await;
        let request = fx.service.request();
        assert_eq!(request.phase(), RequestPhase::Idle);
        assert!(!request.running());
        assert_eq!(request.error_id(), 0);
        assert_eq!(request.error(), Some(StorageErrorCode::None));
    }

    #[tokio::test]
    async fn write_round_trip_completes_successfully() {
        let fx = ready_fixture(Latency::Immediate).await;
        let request = fx.service.request();
        let mut rx = request.subscribe();

        request.stage("docs/a.txt").unwrap().write_bytes(&b"hello"[..]).unwrap();
        assert!(request.running());
        assert_eq!(request.action(), Some(StorageAction::Save));
        assert!(fx.bridge.is_registered("pollbridge.storage.save"));

        fx.bridge.poll_once();

        assert!(!request.running());
        assert_eq!(request.error_id(), 0);
        assert!(!request.has_error());
        assert_eq!(
            drain(&mut rx),
            vec![
                RequestEvent::RunningChanged { running: true },
                RequestEvent::RunningChanged { running: false },
                RequestEvent::Completed { success: true },
            ]
        );
        assert_eq!(fx.app.storage_backend().object("docs/a.txt").unwrap(), &b"hello"[..]);
    }

    #[tokio::test]
    async fn pending_save_waits_for_backend() {
        let fx = ready_fixture(Latency::Manual).await;
        let request = fx.service.request();
        let mut rx = request.subscribe();
        request.stage("x").unwrap().write_text("v").unwrap();

        assert_eq!(fx.bridge.poll_once(), 0);
        assert!(request.running());
        assert_eq!(drain(&mut rx), vec![RequestEvent::RunningChanged { running: true }]);

        assert_eq!(fx.app.storage_backend().release_all(), 1);
        assert_eq!(fx.bridge.poll_once(), 1);
        assert!(!request.running());
        assert!(drain(&mut rx).contains(&RequestEvent::Completed { success: true }));
    }

    #[tokio::test]
    async fn fetch_url_stores_download_url() {
        let fx = ready_fixture(Latency::Immediate).await;
        fx.app
            .storage_backend()
            .insert_object("img/cat.png", Bytes::from_static(b"png"));
        let request = fx.service.request();

        request.stage("img/cat.png").unwrap().fetch_url().unwrap();
        fx.bridge.poll_once();

        assert!(!request.has_error());
        assert!(request.download_url().starts_with("memory://"));
        assert!(request.download_url().contains("img/cat.png"));
    }

    #[tokio::test]
    async fn backend_error_is_propagated_verbatim() {
        let fx = ready_fixture(Latency::Immediate).await;
        let request = fx.service.request();
        let mut rx = request.subscribe();

        request.stage("missing").unwrap().remove().unwrap();
        fx.bridge.poll_once();

        assert_eq!(request.error(), Some(StorageErrorCode::ObjectNotFound));
        assert!(!request.error_message().is_empty());
        assert!(drain(&mut rx).contains(&RequestEvent::Completed { success: false }));
    }

    #[tokio::test]
    async fn invalid_status_maps_to_unknown_error() {
        let fx = ready_fixture(Latency::Manual).await;
        let request = fx.service.request();
        request.stage("x").unwrap().write_text("v").unwrap();

        fx.app.storage_backend().abandon_all();
        fx.bridge.poll_once();

        assert_eq!(request.error(), Some(StorageErrorCode::Unknown));
        assert_eq!(request.error_message(), "");
        assert!(!request.running());
    }

    #[tokio::test]
    async fn second_action_while_running_is_rejected() {
        let fx = ready_fixture(Latency::Manual).await;
        let request = fx.service.request();
        request.stage("x").unwrap().write_text("v").unwrap();

        assert_eq!(request.fetch_url(), Err(RequestError::AlreadyRunning));
        assert_eq!(request.remove(), Err(RequestError::AlreadyRunning));
        assert_eq!(request.stage("y").err(), Some(RequestError::AlreadyRunning));

        assert_eq!(request.action(), Some(StorageAction::Save));
        assert_eq!(fx.bridge.pending_count(), 1);
        assert_eq!(fx.service.facade().pending_count(), 1);
        assert_eq!(fx.app.storage_backend().parked_count(), 1);
    }

    #[tokio::test]
    async fn action_requires_staging() {
        let fx = ready_fixture(Latency::Immediate).await;
        let request = fx.service.request();
        assert_eq!(request.write_text("v"), Err(RequestError::NotStaged));

        request.stage("a").unwrap().write_text("v").unwrap();
        fx.bridge.poll_once();
        // The staged target is consumed by the action.
        assert_eq!(request.remove(), Err(RequestError::NotStaged));
        assert!(request.target().is_none());
    }

    #[tokio::test]
    async fn staging_root_is_idempotent_and_clears_errors() {
        let fx = ready_fixture(Latency::Immediate).await;
        let request = fx.service.request();
        request.stage("missing").unwrap().remove().unwrap();
        fx.bridge.poll_once();
        assert!(request.has_error());

        for _ in 0..3 {
            request.stage("").unwrap();
            assert_eq!(request.phase(), RequestPhase::Staged);
            assert!(request.target().unwrap().is_root());
            assert!(!request.has_error());
            assert_eq!(request.error_message(), "");
        }
    }

    #[tokio::test]
    async fn error_persists_until_next_stage() {
        let fx = ready_fixture(Latency::Immediate).await;
        let request = fx.service.request();
        request.stage("missing").unwrap().fetch_url().unwrap();
        fx.bridge.poll_once();

        assert_eq!(request.write_text("v"), Err(RequestError::NotStaged));
        assert!(request.has_error());
        request.stage("other").unwrap();
        assert!(!request.has_error());
    }

    #[tokio::test]
    async fn request_can_be_restaged_and_rerun() {
        let fx = ready_fixture(Latency::Immediate).await;
        let request = fx.service.request();

        request.stage("a").unwrap().write_text("1").unwrap();
        fx.bridge.poll_once();
        request.stage("a").unwrap().fetch_url().unwrap();
        fx.bridge.poll_once();
        request.stage("a").unwrap().remove().unwrap();
        fx.bridge.poll_once();

        assert!(!request.has_error());
        assert!(fx.app.storage_backend().object("a").is_none());
    }

    #[tokio::test]
    async fn dropped_request_receives_nothing() {
        let fx = ready_fixture(Latency::Manual).await;
        let request = fx.service.request();
        request.stage("x").unwrap().write_text("v").unwrap();
        let mut rx = request.subscribe();
        assert_eq!(fx.service.facade().pending_count(), 1);

        drop(request);
        assert_eq!(fx.service.facade().pending_count(), 0);

        fx.app.storage_backend().release_all();
        assert_eq!(fx.bridge.poll_once(), 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn colliding_requests_orphan_the_first() {
        let fx = ready_fixture(Latency::Manual).await;
        let first = fx.service.request();
        let second = fx.service.request();

        first.stage("a").unwrap().write_text("1").unwrap();
        second.stage("b").unwrap().write_text("2").unwrap();
        fx.app.storage_backend().release_all();
        fx.bridge.poll_once();

        assert!(!second.running());
        assert!(!second.has_error());
        // Both saves share "pollbridge.storage.save"; the first is never dispatched.
        assert!(first.running());
        assert_eq!(fx.bridge.poll_once(), 0);
        assert!(first.running());
    }

    #[tokio::test]
    async fn actions_before_ready_are_rejected() {
        let config = BridgeConfig::default();
        let bridge = Bridge::new(&config, Arc::new(ReadinessGate::new()));
        let service = StorageService::new(bridge, &config);
        let request = service.request();

        assert_eq!(
            request.stage("a").err(),
            Some(RequestError::ServiceNotReady { service: "storage" })
        );
        assert_eq!(request.phase(), RequestPhase::Idle);
    }

    #[tokio::test]
    async fn save_output_carries_metadata() {
        let fx = ready_fixture(Latency::Manual).await;
        let request = fx.service.request();
        request.stage("m/n").unwrap().write_bytes(vec![1_u8, 2, 3]).unwrap();

        let handles = fx.app.storage_backend().release_all();
        assert_eq!(handles, 1);
        fx.bridge.poll_once();
        assert_eq!(
            fx.app.storage_backend().last_metadata(),
            Some(ObjectMetadata {
                path: "m/n".to_string(),
                size: 3,
                content_type: None,
                generation: 1,
            })
        );
    }
}
