//! In-memory backend app, storage and instance-id implementations.
//!
//! Calls apply their effect immediately (an upload is visible in
//! [`MemoryStorageBackend::object`] right away); only the settlement of the
//! returned handle is deferred according to [`Latency`]. This makes it easy
//! to hold an operation pending in tests and release it at a chosen point.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use pollbridge_core::{
    AppOptions, BackendApp, BackendFactory, HostEnvironment, InstanceIdBackend,
    InstanceIdErrorCode, ObjectMetadata, OperationCompleter, OperationHandle, OperationOutput,
    StorageBackend, StorageErrorCode, StorageRef,
};
use tracing::debug;
use uuid::Uuid;

/// When handles returned by the in-memory backends settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Latency {
    /// Handles are already settled when returned.
    #[default]
    Immediate,
    /// Handles stay pending until `release_all` (or `abandon_all`) is called.
    Manual,
    /// Handles settle on a spawned task after the given delay.
    Delayed(Duration),
}

// ---------------------------------------------------------------------------
// Settler
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Outcome {
    Success(OperationOutput),
    Failure(i32, String),
}

impl Outcome {
    fn apply(self, completer: OperationCompleter) {
        match self {
            Self::Success(output) => completer.complete(output),
            Self::Failure(code, message) => completer.fail(code, message),
        };
    }
}

/// Settles handles according to a [`Latency`], parking them in manual mode.
#[derive(Debug)]
struct Settler {
    latency: Latency,
    parked: Mutex<Vec<(OperationCompleter, Outcome)>>,
}

impl Settler {
    fn new(latency: Latency) -> Self {
        Self {
            latency,
            parked: Mutex::new(Vec::new()),
        }
    }

    fn settle(&self, outcome: Outcome) -> OperationHandle {
        let (handle, completer) = OperationHandle::pending();
        match self.latency {
            Latency::Immediate => outcome.apply(completer),
            Latency::Manual => self.parked.lock().push((completer, outcome)),
            Latency::Delayed(delay) => match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        tokio::time::sleep(delay).await;
                        outcome.apply(completer);
                    });
                }
                Err(_) => {
                    debug!("no tokio runtime for delayed settlement; settling immediately");
                    outcome.apply(completer);
                }
            },
        }
        handle
    }

    fn release_all(&self) -> usize {
        let parked = std::mem::take(&mut *self.parked.lock());
        let count = parked.len();
        for (completer, outcome) in parked {
            outcome.apply(completer);
        }
        count
    }

    fn abandon_all(&self) -> usize {
        // Dropping a completer invalidates its handle.
        let parked = std::mem::take(&mut *self.parked.lock());
        parked.len()
    }

    fn parked_count(&self) -> usize {
        self.parked.lock().len()
    }
}

// ---------------------------------------------------------------------------
// MemoryStorageBackend
// ---------------------------------------------------------------------------

/// Object store kept in a [`DashMap`] keyed by normalized path.
#[derive(Debug)]
pub struct MemoryStorageBackend {
    bucket: String,
    objects: DashMap<String, Bytes>,
    faults: DashMap<String, StorageErrorCode>,
    generation: AtomicU64,
    last_metadata: Mutex<Option<ObjectMetadata>>,
    settler: Settler,
}

impl MemoryStorageBackend {
    #[must_use]
    pub fn new(bucket: impl Into<String>, latency: Latency) -> Self {
        Self {
            bucket: bucket.into(),
            objects: DashMap::new(),
            faults: DashMap::new(),
            generation: AtomicU64::new(0),
            last_metadata: Mutex::new(None),
            settler: Settler::new(latency),
        }
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Stores an object directly, bypassing handles.
    pub fn insert_object(&self, path: &str, data: Bytes) {
        self.objects
            .insert(StorageRef::parse(path).path().to_string(), data);
    }

    /// Contents of the object at `path`.
    #[must_use]
    pub fn object(&self, path: &str) -> Option<Bytes> {
        self.objects
            .get(StorageRef::parse(path).path())
            .map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Fails the next call targeting `path` with `code`.
    pub fn inject_fault(&self, path: &str, code: StorageErrorCode) {
        self.faults
            .insert(StorageRef::parse(path).path().to_string(), code);
    }

    /// Metadata of the most recent upload.
    #[must_use]
    pub fn last_metadata(&self) -> Option<ObjectMetadata> {
        self.last_metadata.lock().clone()
    }

    /// Settles every parked handle. Returns how many were settled.
    pub fn release_all(&self) -> usize {
        self.settler.release_all()
    }

    /// Invalidates every parked handle. Returns how many were dropped.
    pub fn abandon_all(&self) -> usize {
        self.settler.abandon_all()
    }

    #[must_use]
    pub fn parked_count(&self) -> usize {
        self.settler.parked_count()
    }

    fn take_fault(&self, target: &StorageRef) -> Option<Outcome> {
        self.faults.remove(target.path()).map(|(path, code)| {
            Outcome::Failure(code.code(), format!("injected {code:?} for /{path}"))
        })
    }

    fn not_found(target: &StorageRef) -> Outcome {
        Outcome::Failure(
            StorageErrorCode::ObjectNotFound.code(),
            format!("object {target} does not exist"),
        )
    }
}

impl StorageBackend for MemoryStorageBackend {
    fn put_bytes(&self, target: &StorageRef, data: Bytes) -> OperationHandle {
        let outcome = if let Some(fault) = self.take_fault(target) {
            fault
        } else if target.is_root() {
            Outcome::Failure(
                StorageErrorCode::Unknown.code(),
                "cannot write to the bucket root".to_string(),
            )
        } else {
            let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
            let metadata = ObjectMetadata {
                path: target.path().to_string(),
                size: data.len() as u64,
                content_type: None,
                generation,
            };
            self.objects.insert(target.path().to_string(), data);
            *self.last_metadata.lock() = Some(metadata.clone());
            Outcome::Success(OperationOutput::Metadata(metadata))
        };
        self.settler.settle(outcome)
    }

    fn delete(&self, target: &StorageRef) -> OperationHandle {
        let outcome = match self.take_fault(target) {
            Some(fault) => fault,
            None => match self.objects.remove(target.path()) {
                Some(_) => Outcome::Success(OperationOutput::Unit),
                None => Self::not_found(target),
            },
        };
        self.settler.settle(outcome)
    }

    fn download_url(&self, target: &StorageRef) -> OperationHandle {
        let outcome = match self.take_fault(target) {
            Some(fault) => fault,
            None if self.objects.contains_key(target.path()) => {
                Outcome::Success(OperationOutput::Text(format!(
                    "memory://{}/{}?token={}",
                    self.bucket,
                    target.path(),
                    Uuid::new_v4()
                )))
            }
            None => Self::not_found(target),
        };
        self.settler.settle(outcome)
    }
}

// ---------------------------------------------------------------------------
// MemoryInstanceIdBackend
// ---------------------------------------------------------------------------

/// Instance-ID backend with a fixed, randomly generated id.
#[derive(Debug)]
pub struct MemoryInstanceIdBackend {
    id: String,
    fault: Mutex<Option<(InstanceIdErrorCode, String)>>,
    settler: Settler,
}

impl MemoryInstanceIdBackend {
    #[must_use]
    pub fn new(latency: Latency) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            fault: Mutex::new(None),
            settler: Settler::new(latency),
        }
    }

    /// The id successful fetches complete with.
    #[must_use]
    pub fn current_id(&self) -> String {
        self.id.clone()
    }

    /// Fails the next fetch with `code` and `message`.
    pub fn inject_fault(&self, code: InstanceIdErrorCode, message: impl Into<String>) {
        *self.fault.lock() = Some((code, message.into()));
    }

    pub fn release_all(&self) -> usize {
        self.settler.release_all()
    }

    pub fn abandon_all(&self) -> usize {
        self.settler.abandon_all()
    }
}

impl InstanceIdBackend for MemoryInstanceIdBackend {
    fn get_id(&self) -> OperationHandle {
        let outcome = match self.fault.lock().take() {
            Some((code, message)) => Outcome::Failure(code.code(), message),
            None => Outcome::Success(OperationOutput::Text(self.id.clone())),
        };
        self.settler.settle(outcome)
    }
}

// ---------------------------------------------------------------------------
// MemoryApp / MemoryFactory / MemoryHost
// ---------------------------------------------------------------------------

/// Backend app bundling the in-memory capability backends.
#[derive(Debug)]
pub struct MemoryApp {
    name: String,
    storage: Arc<MemoryStorageBackend>,
    instance_id: Arc<MemoryInstanceIdBackend>,
}

impl MemoryApp {
    /// App whose handles settle immediately.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_latency(name, Latency::Immediate)
    }

    #[must_use]
    pub fn with_latency(name: impl Into<String>, latency: Latency) -> Self {
        let name = name.into();
        let bucket = format!("{name}.bucket");
        Self::build(name, bucket, latency)
    }

    /// App configured from `options`. The bucket defaults to `<project>.bucket`.
    #[must_use]
    pub fn from_options(options: &AppOptions, latency: Latency) -> Self {
        let name = options
            .app_id
            .clone()
            .unwrap_or_else(|| "memory".to_string());
        let bucket = options.storage_bucket.clone().unwrap_or_else(|| {
            format!(
                "{}.bucket",
                options.project_id.as_deref().unwrap_or(name.as_str())
            )
        });
        Self::build(name, bucket, latency)
    }

    fn build(name: String, bucket: String, latency: Latency) -> Self {
        Self {
            name,
            storage: Arc::new(MemoryStorageBackend::new(bucket, latency)),
            instance_id: Arc::new(MemoryInstanceIdBackend::new(latency)),
        }
    }

    #[must_use]
    pub fn storage_backend(&self) -> &Arc<MemoryStorageBackend> {
        &self.storage
    }

    #[must_use]
    pub fn instance_id_backend(&self) -> &Arc<MemoryInstanceIdBackend> {
        &self.instance_id
    }
}

impl BackendApp for MemoryApp {
    fn name(&self) -> &str {
        &self.name
    }

    fn storage(&self) -> Arc<dyn StorageBackend> {
        self.storage.clone()
    }

    fn instance_id(&self) -> Arc<dyn InstanceIdBackend> {
        self.instance_id.clone()
    }
}

/// Factory handing out a prepared [`MemoryApp`].
#[derive(Debug)]
pub struct MemoryFactory {
    app: Arc<MemoryApp>,
    failures_left: AtomicU32,
    created: AtomicU32,
}

impl MemoryFactory {
    #[must_use]
    pub fn new(app: Arc<MemoryApp>) -> Self {
        Self {
            app,
            failures_left: AtomicU32::new(0),
            created: AtomicU32::new(0),
        }
    }

    /// Makes the next `n` `create_app` calls fail.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Number of successful `create_app` calls.
    #[must_use]
    pub fn created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn app(&self) -> &Arc<MemoryApp> {
        &self.app
    }
}

impl BackendFactory for MemoryFactory {
    fn create_app(&self, options: &AppOptions) -> anyhow::Result<Arc<dyn BackendApp>> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("app creation refused (project {:?})", options.project_id);
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.app.clone())
    }
}

/// Host whose readiness is toggled by hand.
#[derive(Debug)]
pub struct MemoryHost {
    ready: AtomicBool,
}

impl MemoryHost {
    #[must_use]
    pub fn new(ready: bool) -> Self {
        Self {
            ready: AtomicBool::new(ready),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

impl HostEnvironment for MemoryHost {
    fn is_host_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
