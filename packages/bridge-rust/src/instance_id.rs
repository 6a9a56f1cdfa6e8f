//! Instance-ID service and request.
//!
//! The request has no staging step: [`InstanceIdRequest::exec`] goes from
//! idle straight to running and submits under the fixed identifier
//! `getInstance`.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use pollbridge_core::{InstanceIdBackend, InstanceIdErrorCode, OperationHandle, OperationOutput};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::request::{
    resolve, ErrorState, RequestError, RequestEvent, RequestEvents, RequestPhase, Resolution,
};
use crate::service::{
    CompletionTarget, ManagedService, OwnerId, ServiceContext, ServiceFacade, ServiceLifecycle,
    ServiceState,
};

/// Identifier suffix of the instance-id fetch.
pub const GET_INSTANCE: &str = "getInstance";

// ---------------------------------------------------------------------------
// InstanceIdService
// ---------------------------------------------------------------------------

/// Instance-ID service: owns the `iid` façade and, once ready, the backend.
pub struct InstanceIdService {
    facade: Arc<ServiceFacade>,
    lifecycle: ServiceLifecycle,
    backend: RwLock<Option<Arc<dyn InstanceIdBackend>>>,
    event_capacity: usize,
}

impl InstanceIdService {
    pub const NAME: &'static str = "instance_id";

    /// Prefix segment used in bridge identifiers.
    pub const PREFIX: &'static str = "iid";

    #[must_use]
    pub fn new(bridge: Arc<Bridge>, config: &BridgeConfig) -> Arc<Self> {
        Arc::new(Self {
            facade: ServiceFacade::new(Self::NAME, config.service_prefix(Self::PREFIX), bridge),
            lifecycle: ServiceLifecycle::new(),
            backend: RwLock::new(None),
            event_capacity: config.event_channel_capacity,
        })
    }

    #[must_use]
    pub fn request(self: &Arc<Self>) -> InstanceIdRequest {
        InstanceIdRequest::new(Arc::clone(self), self.event_capacity)
    }

    #[must_use]
    pub fn state(&self) -> ServiceState {
        self.lifecycle.get()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.lifecycle.is_ready()
    }

    #[must_use]
    pub fn facade(&self) -> &Arc<ServiceFacade> {
        &self.facade
    }

    fn ready_backend(&self) -> Result<Arc<dyn InstanceIdBackend>, RequestError> {
        let backend = if self.lifecycle.is_ready() {
            self.backend.read().clone()
        } else {
            None
        };
        backend.ok_or(RequestError::ServiceNotReady {
            service: Self::NAME,
        })
    }
}

#[async_trait]
impl ManagedService for InstanceIdService {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn init(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        if !self.lifecycle.begin_init() {
            return Ok(());
        }
        let app = ctx.readiness.wait_ready().await?;
        *self.backend.write() = Some(app.instance_id());
        self.lifecycle.set(ServiceState::Ready);
        info!(app = app.name(), "instance-id service ready");
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        self.lifecycle.set(ServiceState::Stopped);
        self.backend.write().take();
        info!(pending = self.facade.pending_count(), "instance-id service stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// InstanceIdRequest
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct IdState {
    phase: RequestPhase,
    error: ErrorState,
    instance_id: String,
}

struct IdShared {
    owner: OwnerId,
    service: Arc<InstanceIdService>,
    state: Mutex<IdState>,
    events: RequestEvents,
}

impl CompletionTarget for IdShared {
    fn on_operation_complete(&self, action_id: &str, handle: &OperationHandle) {
        let success = {
            let mut state = self.state.lock();
            match resolve(handle, InstanceIdErrorCode::Unknown.code()) {
                Resolution::Failed(error) => {
                    state.error = error;
                    state.instance_id.clear();
                }
                Resolution::Succeeded(Some(OperationOutput::Text(id))) => state.instance_id = id,
                Resolution::Succeeded(_) => state.instance_id.clear(),
            }
            if state.phase != RequestPhase::Running {
                return;
            }
            state.phase = RequestPhase::Idle;
            !state.error.is_error()
        };
        debug!(owner = self.owner.0, action = action_id, success, "instance-id request completed");
        self.events.finished(success);
    }
}

/// Fetches the installation's instance id.
pub struct InstanceIdRequest {
    shared: Arc<IdShared>,
}

impl InstanceIdRequest {
    fn new(service: Arc<InstanceIdService>, event_capacity: usize) -> Self {
        let owner = service.facade().allocate_owner();
        Self {
            shared: Arc::new(IdShared {
                owner,
                service,
                state: Mutex::new(IdState {
                    phase: RequestPhase::Idle,
                    error: ErrorState::none(),
                    instance_id: String::new(),
                }),
                events: RequestEvents::new(event_capacity),
            }),
        }
    }

    /// Starts the fetch. Clears the previous error.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::AlreadyRunning`] while a fetch is in flight and
    /// [`RequestError::ServiceNotReady`] before the service is ready.
    pub fn exec(&self) -> Result<(), RequestError> {
        let backend = {
            let mut state = self.shared.state.lock();
            state.phase.check_stage()?;
            let backend = self.shared.service.ready_backend()?;
            state.phase = RequestPhase::Running;
            state.error = ErrorState::none();
            backend
        };
        self.shared
            .events
            .emit(RequestEvent::RunningChanged { running: true });

        let handle = backend.get_id();
        let shared: Arc<dyn CompletionTarget> = self.shared.clone();
        self.shared.service.facade().submit(
            GET_INSTANCE,
            self.shared.owner,
            Arc::downgrade(&shared),
            handle,
        );
        Ok(())
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RequestEvent> {
        self.shared.events.subscribe()
    }

    #[must_use]
    pub fn running(&self) -> bool {
        self.shared.state.lock().phase == RequestPhase::Running
    }

    #[must_use]
    pub fn error_id(&self) -> i32 {
        self.shared.state.lock().error.code
    }

    #[must_use]
    pub fn error(&self) -> Option<InstanceIdErrorCode> {
        InstanceIdErrorCode::from_code(self.error_id())
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.shared.state.lock().error.is_error()
    }

    #[must_use]
    pub fn error_message(&self) -> String {
        self.shared.state.lock().error.message.clone()
    }

    /// Instance id from the last successful fetch, empty otherwise.
    #[must_use]
    pub fn instance_id(&self) -> String {
        self.shared.state.lock().instance_id.clone()
    }
}

impl Drop for InstanceIdRequest {
    fn drop(&mut self) {
        self.shared.service.facade().unregister(self.shared.owner);
    }
}
