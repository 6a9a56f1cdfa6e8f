//! Pollbridge core: operation handles and backend contracts.
//!
//! Everything the correlation engine needs to know about the backend SDK
//! lives here: pollable [`OperationHandle`]s, the per-capability backend
//! traits and the host/application traits used during startup.

pub mod handle;
pub mod host;
pub mod instance_id;
pub mod storage;

pub use handle::{OperationCompleter, OperationHandle, OperationOutput, OperationStatus, ERROR_NONE};
pub use host::{AppOptions, BackendApp, BackendFactory, HostEnvironment};
pub use instance_id::{InstanceIdBackend, InstanceIdErrorCode};
pub use storage::{ObjectMetadata, StorageBackend, StorageErrorCode, StorageRef};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
