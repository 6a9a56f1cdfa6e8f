//! Pollbridge: turns pollable backend operation handles into completion events.

pub mod backends;
pub mod bridge;
pub mod config;
pub mod instance_id;
pub mod logging;
pub mod request;
pub mod runtime;
pub mod service;
pub mod storage;

pub use bridge::{Bridge, CompletionObserver, ReadinessGate, Subscription};
pub use config::BridgeConfig;
pub use instance_id::{InstanceIdRequest, InstanceIdService};
pub use pollbridge_core::{
    AppOptions, BackendApp, BackendFactory, HostEnvironment, OperationHandle, OperationStatus,
};
pub use request::{RequestError, RequestEvent, RequestPhase};
pub use runtime::BridgeRuntime;
pub use storage::{StorageAction, StorageRequest, StorageService};
