//! Per-service demultiplexing of the shared completion stream.
//!
//! Each backend capability owns one [`ServiceFacade`]. Requests submit their
//! operations through it; the façade namespaces the identifier with its
//! prefix, registers the handle with the [`Bridge`] and remembers which
//! request is waiting. When the bridge emits a completion carrying the
//! prefix, the façade pops the waiting request and hands it the unprefixed
//! identifier.
//!
//! The sub-registry holds weak references only. A request that is dropped
//! unregisters itself; a completion that still arrives for it is logged and
//! discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use pollbridge_core::OperationHandle;
use tracing::{debug, warn};

use crate::bridge::{Bridge, CompletionObserver, Subscription};

/// Identifies the owner of sub-registry entries, allocated per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(pub u64);

/// Receiver of a demultiplexed completion.
pub trait CompletionTarget: Send + Sync {
    /// Called once per submitted operation with the unprefixed identifier.
    fn on_operation_complete(&self, action_id: &str, handle: &OperationHandle);
}

struct PendingOwner {
    owner: OwnerId,
    target: Weak<dyn CompletionTarget>,
}

/// Demultiplexer between the bridge's completion stream and requests.
pub struct ServiceFacade {
    name: &'static str,
    prefix: String,
    bridge: Arc<Bridge>,
    owners: Mutex<HashMap<String, PendingOwner>>,
    next_owner: AtomicU64,
    subscription: Mutex<Option<Subscription>>,
}

/// Observer registered with the bridge. Holds the façade weakly so the
/// bridge never keeps a façade alive.
struct FacadeObserver {
    facade: Weak<ServiceFacade>,
}

impl CompletionObserver for FacadeObserver {
    fn on_completion(&self, identifier: &str, handle: &OperationHandle) {
        if let Some(facade) = self.facade.upgrade() {
            facade.dispatch(identifier, handle);
        }
    }
}

impl ServiceFacade {
    /// Creates the façade and subscribes it to `bridge`.
    ///
    /// The subscription lives as long as the façade.
    #[must_use]
    pub fn new(name: &'static str, prefix: impl Into<String>, bridge: Arc<Bridge>) -> Arc<Self> {
        let facade = Arc::new(Self {
            name,
            prefix: prefix.into(),
            bridge: Arc::clone(&bridge),
            owners: Mutex::new(HashMap::new()),
            next_owner: AtomicU64::new(1),
            subscription: Mutex::new(None),
        });
        let observer = Arc::new(FacadeObserver {
            facade: Arc::downgrade(&facade),
        });
        *facade.subscription.lock() = Some(bridge.subscribe(observer));
        facade
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// Allocates a fresh owner id for a new request.
    pub fn allocate_owner(&self) -> OwnerId {
        OwnerId(self.next_owner.fetch_add(1, Ordering::Relaxed))
    }

    /// Full bridge identifier for `request_id`.
    #[must_use]
    pub fn identifier(&self, request_id: &str) -> String {
        format!("{}{}", self.prefix, request_id)
    }

    /// Registers `handle` under `prefix + request_id` and records `target` as
    /// the request waiting for it. Returns the full identifier.
    ///
    /// A pending entry with the same identifier is overwritten, both here and
    /// in the bridge: its owner is never notified. If the earlier operation
    /// has already settled and a scan runs between recording the new owner
    /// and registering the new handle, that scan delivers the earlier handle
    /// to the new owner, which then completes while its own call is still in
    /// flight.
    pub fn submit(
        &self,
        request_id: &str,
        owner: OwnerId,
        target: Weak<dyn CompletionTarget>,
        handle: OperationHandle,
    ) -> String {
        let identifier = self.identifier(request_id);
        let previous = self
            .owners
            .lock()
            .insert(identifier.clone(), PendingOwner { owner, target });
        if let Some(previous) = previous {
            warn!(
                service = self.name,
                %identifier,
                orphaned_owner = previous.owner.0,
                "identifier already awaited by another request"
            );
        }
        // Owner is recorded before registering so a fast completion always finds it.
        self.bridge.register(identifier.clone(), handle);
        identifier
    }

    /// Removes every entry owned by `owner`. Returns how many were removed.
    pub fn unregister(&self, owner: OwnerId) -> usize {
        let mut owners = self.owners.lock();
        let before = owners.len();
        owners.retain(|_, pending| pending.owner != owner);
        before - owners.len()
    }

    /// Number of submitted operations not yet dispatched.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.owners.lock().len()
    }

    /// Returns `true` while `identifier` awaits completion.
    #[must_use]
    pub fn is_pending(&self, identifier: &str) -> bool {
        self.owners.lock().contains_key(identifier)
    }

    /// Detaches the façade from the bridge's completion stream.
    pub fn detach(&self) {
        self.subscription.lock().take();
    }

    fn dispatch(&self, identifier: &str, handle: &OperationHandle) {
        let Some(action_id) = identifier.strip_prefix(self.prefix.as_str()) else {
            return;
        };
        debug!(service = self.name, %identifier, "completion received");

        // Pop before forwarding: the target may submit again from its handler.
        let pending = self.owners.lock().remove(identifier);
        let Some(pending) = pending else {
            debug!(service = self.name, %identifier, "no owner found; completion discarded");
            return;
        };
        match pending.target.upgrade() {
            Some(target) => target.on_operation_complete(action_id, handle),
            None => {
                debug!(service = self.name, %identifier, "owner dropped; completion discarded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pollbridge_core::{OperationOutput, OperationStatus};

    use super::*;
    use crate::bridge::ReadinessGate;
    use crate::config::BridgeConfig;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, OperationStatus)>>,
    }

    impl CompletionTarget for Recorder {
        fn on_operation_complete(&self, action_id: &str, handle: &OperationHandle) {
            self.seen
                .lock()
                .push((action_id.to_string(), handle.status()));
        }
    }

    fn bridge() -> Arc<Bridge> {
        Bridge::new(&BridgeConfig::default(), Arc::new(ReadinessGate::new()))
    }

    fn weak(target: &Arc<Recorder>) -> Weak<dyn CompletionTarget> {
        let target: Arc<dyn CompletionTarget> = target.clone();
        Arc::downgrade(&target)
    }

    #[tokio::test]
    async fn routes_unprefixed_identifier_to_owner() {
        let bridge = bridge();
        let facade = ServiceFacade::new("storage", "pb.storage.", Arc::clone(&bridge));
        let recorder = Arc::new(Recorder::default());
        let owner = facade.allocate_owner();

        let id = facade.submit(
            "save",
            owner,
            weak(&recorder),
            OperationHandle::completed(OperationOutput::Unit),
        );
        assert_eq!(id, "pb.storage.save");
        assert!(bridge.is_registered("pb.storage.save"));

        bridge.poll_once();
        assert_eq!(
            *recorder.seen.lock(),
            vec![("save".to_string(), OperationStatus::Complete)]
        );
        assert_eq!(facade.pending_count(), 0);
    }

    #[tokio::test]
    async fn ignores_events_of_other_prefixes() {
        let bridge = bridge();
        let storage = ServiceFacade::new("storage", "pb.storage.", Arc::clone(&bridge));
        let iid = ServiceFacade::new("iid", "pb.iid.", Arc::clone(&bridge));
        let storage_rec = Arc::new(Recorder::default());
        let iid_rec = Arc::new(Recorder::default());

        storage.submit("save", storage.allocate_owner(), weak(&storage_rec), OperationHandle::invalid());
        iid.submit("getInstance", iid.allocate_owner(), weak(&iid_rec), OperationHandle::invalid());
        bridge.poll_once();

        assert_eq!(storage_rec.seen.lock().len(), 1);
        assert_eq!(iid_rec.seen.lock()[0].0, "getInstance");
        assert_eq!(iid_rec.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn unregistered_owner_is_never_called() {
        let bridge = bridge();
        let facade = ServiceFacade::new("storage", "pb.storage.", Arc::clone(&bridge));
        let recorder = Arc::new(Recorder::default());
        let owner = facade.allocate_owner();
        let (handle, completer) = OperationHandle::pending();
        facade.submit("delete", owner, weak(&recorder), handle);

        assert_eq!(facade.unregister(owner), 1);
        completer.complete(OperationOutput::Unit);
        assert_eq!(bridge.poll_once(), 1);

        assert!(recorder.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn dropped_target_is_skipped() {
        let bridge = bridge();
        let facade = ServiceFacade::new("storage", "pb.storage.", Arc::clone(&bridge));
        let recorder = Arc::new(Recorder::default());
        facade.submit("save", facade.allocate_owner(), weak(&recorder), OperationHandle::invalid());
        drop(recorder);

        assert_eq!(bridge.poll_once(), 1);
        assert_eq!(facade.pending_count(), 0);
    }

    #[tokio::test]
    async fn collision_orphans_first_owner() {
        let bridge = bridge();
        let facade = ServiceFacade::new("storage", "pb.storage.", Arc::clone(&bridge));
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());

        facade.submit("save", facade.allocate_owner(), weak(&first), OperationHandle::invalid());
        facade.submit("save", facade.allocate_owner(), weak(&second), OperationHandle::invalid());
        bridge.poll_once();

        assert!(first.seen.lock().is_empty());
        assert_eq!(second.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn scan_between_owner_and_handle_misattributes_collision() {
        let bridge = bridge();
        let facade = ServiceFacade::new("storage", "pb.storage.", Arc::clone(&bridge));
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let earlier = OperationHandle::failed(2, "gone");
        facade.submit("save", facade.allocate_owner(), weak(&first), earlier);

        // First half of a colliding submit: the new owner is recorded, its handle is not yet registered.
        facade.owners.lock().insert(
            facade.identifier("save"),
            PendingOwner {
                owner: facade.allocate_owner(),
                target: weak(&second),
            },
        );
        bridge.poll_once();

        assert!(first.seen.lock().is_empty());
        assert_eq!(
            *second.seen.lock(),
            vec![("save".to_string(), OperationStatus::Complete)]
        );
    }

    #[tokio::test]
    async fn dropping_facade_unsubscribes() {
        let bridge = bridge();
        let facade = ServiceFacade::new("storage", "pb.storage.", Arc::clone(&bridge));
        assert_eq!(bridge.observer_count(), 1);

        drop(facade);
        assert_eq!(bridge.observer_count(), 0);
    }

    #[tokio::test]
    async fn detach_stops_dispatch() {
        let bridge = bridge();
        let facade = ServiceFacade::new("storage", "pb.storage.", Arc::clone(&bridge));
        let recorder = Arc::new(Recorder::default());
        facade.submit("save", facade.allocate_owner(), weak(&recorder), OperationHandle::invalid());

        facade.detach();
        bridge.poll_once();
        assert!(recorder.seen.lock().is_empty());
        assert_eq!(facade.pending_count(), 1);
    }
}
