use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use pollbridge_core::StorageBackend;
use tracing::{debug, info};

use super::request::StorageRequest;
use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::request::RequestError;
use crate::service::{ManagedService, ServiceContext, ServiceFacade, ServiceLifecycle, ServiceState};

/// Storage service: owns the storage façade and, once ready, the backend.
pub struct StorageService {
    facade: Arc<ServiceFacade>,
    lifecycle: ServiceLifecycle,
    backend: RwLock<Option<Arc<dyn StorageBackend>>>,
    event_capacity: usize,
}

impl StorageService {
    pub const NAME: &'static str = "storage";

    /// Creates the service and subscribes its façade to `bridge`.
    #[must_use]
    pub fn new(bridge: Arc<Bridge>, config: &BridgeConfig) -> Arc<Self> {
        Arc::new(Self {
            facade: ServiceFacade::new(Self::NAME, config.service_prefix(Self::NAME), bridge),
            lifecycle: ServiceLifecycle::new(),
            backend: RwLock::new(None),
            event_capacity: config.event_channel_capacity,
        })
    }

    /// Creates a new idle request bound to this service.
    #[must_use]
    pub fn request(self: &Arc<Self>) -> StorageRequest {
        StorageRequest::new(Arc::clone(self), self.event_capacity)
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

    /// The storage backend, once the service is ready.
    #[must_use]
    pub fn backend(&self) -> Option<Arc<dyn StorageBackend>> {
        if !self.lifecycle.is_ready() {
            return None;
        }
        self.backend.read().clone()
    }

    pub(crate) fn ready_backend(&self) -> Result<Arc<dyn StorageBackend>, RequestError> {
        self.backend().ok_or(RequestError::ServiceNotReady {
            service: Self::NAME,
        })
    }
}

#[async_trait]
impl ManagedService for StorageService {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn init(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        if !self.lifecycle.begin_init() {
            return Ok(());
        }
        debug!("storage waiting for backend app");
        let app = ctx.readiness.wait_ready().await?;
        *self.backend.write() = Some(app.storage());
        self.lifecycle.set(ServiceState::Ready);
        info!(app = app.name(), "storage service ready");
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        self.lifecycle.set(ServiceState::Stopped);
        self.backend.write().take();
        info!(
            pending = self.facade.pending_count(),
            "storage service stopped"
        );
        Ok(())
    }
}
