//! Backend services and their plumbing.
//!
//! 1. **Lifecycle** (`registry`, `state`): `ManagedService` trait, registry
//!    with init/shutdown ordering, per-service `ServiceState`
//! 2. **Demultiplexing** (`facade`): routes bridge completions back to the
//!    request that submitted the operation

pub mod facade;
pub mod registry;
pub mod state;

pub use facade::{CompletionTarget, OwnerId, ServiceFacade};
pub use registry::{ManagedService, ServiceContext, ServiceRegistry};
pub use state::{ServiceLifecycle, ServiceState};
