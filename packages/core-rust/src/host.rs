//! Host environment and backend application contracts.
//!
//! The host environment reports when the platform is ready to create the
//! backend application (on mobile targets this means a native window exists).
//! The [`BackendFactory`] then builds the [`BackendApp`], which hands out the
//! per-capability backends.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::instance_id::InstanceIdBackend;
use crate::storage::StorageBackend;

/// Options used to create the backend application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppOptions {
    pub api_key: Option<String>,
    pub app_id: Option<String>,
    pub project_id: Option<String>,
    pub storage_bucket: Option<String>,
}

/// Readiness probe for the host platform.
pub trait HostEnvironment: Send + Sync {
    /// Returns `true` once the host is ready for backend initialization.
    fn is_host_ready(&self) -> bool;
}

/// A created backend application.
pub trait BackendApp: Send + Sync {
    /// Human readable application name, used in logs.
    fn name(&self) -> &str;

    /// Storage calls bound to this application.
    fn storage(&self) -> Arc<dyn StorageBackend>;

    /// Instance-ID calls bound to this application.
    fn instance_id(&self) -> Arc<dyn InstanceIdBackend>;
}

/// Creates the backend application once the host is ready.
pub trait BackendFactory: Send + Sync {
    /// Creates the application from `options`.
    ///
    /// # Errors
    ///
    /// Returns an error if the SDK refuses to create the application; the
    /// caller retries on its next initialization tick.
    fn create_app(&self, options: &AppOptions) -> anyhow::Result<Arc<dyn BackendApp>>;
}
