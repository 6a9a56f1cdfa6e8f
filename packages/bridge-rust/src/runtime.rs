//! Composition root.
//!
//! [`BridgeRuntime::start`] allocates the shared pieces (readiness gate,
//! bridge, services) and starts probing the host; [`BridgeRuntime::ready`]
//! waits for the backend app and initializes the services. Requests can be
//! created right after `start`, but they are rejected until `ready` returns.

use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use pollbridge_core::{AppOptions, BackendFactory, HostEnvironment};
use tracing::info;

use crate::bridge::{Bridge, InitPoller, ProbeContext, ReadinessGate};
use crate::config::BridgeConfig;
use crate::instance_id::InstanceIdService;
use crate::service::{ManagedService, ServiceContext, ServiceRegistry};
use crate::storage::StorageService;

/// Owns the bridge, the startup poller and every backend service.
pub struct BridgeRuntime {
    config: Arc<BridgeConfig>,
    gate: Arc<ReadinessGate>,
    init_poller: Mutex<Option<InitPoller>>,
    bridge: Arc<Bridge>,
    storage: Arc<StorageService>,
    instance_id: Arc<InstanceIdService>,
    services: ServiceRegistry,
}

impl BridgeRuntime {
    /// Builds the runtime and starts probing `host`.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside a tokio runtime.
    pub fn start(
        config: BridgeConfig,
        options: AppOptions,
        host: Arc<dyn HostEnvironment>,
        factory: Arc<dyn BackendFactory>,
    ) -> anyhow::Result<Self> {
        tokio::runtime::Handle::try_current()
            .context("bridge runtime must be started inside a tokio runtime")?;

        let gate = Arc::new(ReadinessGate::new());
        let init_poller = InitPoller::start(
            ProbeContext {
                gate: Arc::clone(&gate),
                host,
                factory,
                options,
            },
            &config,
        );

        let bridge = Bridge::new(&config, Arc::clone(&gate));
        let storage = StorageService::new(Arc::clone(&bridge), &config);
        let instance_id = InstanceIdService::new(Arc::clone(&bridge), &config);

        let services = ServiceRegistry::new();
        services.register(Arc::clone(&storage));
        services.register(Arc::clone(&instance_id));
        info!(services = ?services.names(), "bridge runtime started");

        Ok(Self {
            config: Arc::new(config),
            gate,
            init_poller: Mutex::new(Some(init_poller)),
            bridge,
            storage,
            instance_id,
            services,
        })
    }

    /// Waits for the backend app, then initializes every service.
    ///
    /// # Errors
    ///
    /// Returns an error if the host never became ready within
    /// `init_attempt_limit` probes, or the first service initialization error.
    pub async fn ready(&self) -> anyhow::Result<()> {
        let app = self.gate.wait_ready().await?;
        info!(app = app.name(), "backend app ready; initializing services");
        self.services.init_all(&self.context()).await?;
        if let Some(poller) = self.init_poller.lock().as_ref() {
            info!(attempts = poller.attempts(), "initialization finished");
        }
        Ok(())
    }

    /// Stops probing and polling, then shuts services down in reverse order.
    ///
    /// # Errors
    ///
    /// Returns the first service shutdown error.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        if let Some(mut poller) = self.init_poller.lock().take() {
            poller.stop();
        }
        self.bridge.shutdown();
        self.services.shutdown_all(false).await?;
        info!(pending = self.bridge.pending_count(), "bridge runtime stopped");
        Ok(())
    }

    #[must_use]
    pub fn context(&self) -> ServiceContext {
        ServiceContext {
            config: Arc::clone(&self.config),
            readiness: Arc::clone(&self.gate),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    #[must_use]
    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    #[must_use]
    pub fn readiness(&self) -> &Arc<ReadinessGate> {
        &self.gate
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<StorageService> {
        &self.storage
    }

    #[must_use]
    pub fn instance_id(&self) -> &Arc<InstanceIdService> {
        &self.instance_id
    }

    #[must_use]
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Typed service lookup.
    #[must_use]
    pub fn service<T: ManagedService>(&self) -> Option<Arc<T>> {
        self.services.get::<T>()
    }
}
