//! Backend implementations that run without the native SDK.

pub mod memory;

pub use memory::{
    Latency, MemoryApp, MemoryFactory, MemoryHost, MemoryInstanceIdBackend, MemoryStorageBackend,
};
