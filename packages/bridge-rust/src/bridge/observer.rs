//! Completion observers and subscription handles.
//!
//! Defines [`CompletionObserver`] for reacting to settled operations and
//! [`Subscription`], the RAII handle returned by
//! [`Bridge::subscribe`](super::Bridge::subscribe). Dropping the subscription
//! detaches the observer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use pollbridge_core::OperationHandle;

/// Observer for completion events emitted by the bridge.
///
/// Every observer sees every event; implementations filter by identifier.
/// Called on the poller task with no bridge lock held, so an observer may
/// register new operations from inside the callback.
pub trait CompletionObserver: Send + Sync {
    fn on_completion(&self, identifier: &str, handle: &OperationHandle);
}

impl<F> CompletionObserver for F
where
    F: Fn(&str, &OperationHandle) + Send + Sync,
{
    fn on_completion(&self, identifier: &str, handle: &OperationHandle) {
        self(identifier, handle);
    }
}

/// Fan-out list of observers keyed by subscription id.
#[derive(Default)]
pub(crate) struct ObserverList {
    next_id: AtomicU64,
    observers: Mutex<Vec<(u64, Arc<dyn CompletionObserver>)>>,
}

impl ObserverList {
    pub(crate) fn add(&self, observer: Arc<dyn CompletionObserver>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().push((id, observer));
        id
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.lock().len()
    }

    /// Delivers one event to every observer subscribed at call time.
    ///
    /// The list is snapshotted first; the lock is not held during delivery.
    pub(crate) fn notify(&self, identifier: &str, handle: &OperationHandle) {
        let snapshot: Vec<Arc<dyn CompletionObserver>> = self
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in snapshot {
            observer.on_completion(identifier, handle);
        }
    }
}

/// Handle to an active completion subscription.
///
/// The observer stays attached until the subscription is dropped or
/// [`cancel`](Self::cancel)led.
#[must_use = "dropping a Subscription detaches its observer immediately"]
pub struct Subscription {
    id: u64,
    list: Weak<ObserverList>,
}

impl Subscription {
    pub(crate) fn new(id: u64, list: &Arc<ObserverList>) -> Self {
        Self {
            id,
            list: Arc::downgrade(list),
        }
    }

    /// Detaches the observer now.
    pub fn cancel(self) {
        drop(self);
    }

    /// Returns `true` while the bridge is alive and the observer attached.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.list.upgrade().is_some_and(|list| {
            list.observers
                .lock()
                .iter()
                .any(|(observer_id, _)| *observer_id == self.id)
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(list) = self.list.upgrade() {
            list.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counting(counter: &Arc<AtomicUsize>) -> Arc<dyn CompletionObserver> {
        let counter = Arc::clone(counter);
        Arc::new(move |_: &str, _: &OperationHandle| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn notify_reaches_every_observer() {
        let list = Arc::new(ObserverList::default());
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let _sa = Subscription::new(list.add(counting(&a)), &list);
        let _sb = Subscription::new(list.add(counting(&b)), &list);

        list.notify("x", &OperationHandle::invalid());

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_subscription_detaches_observer() {
        let list = Arc::new(ObserverList::default());
        let count = Arc::new(AtomicUsize::new(0));
        let sub = Subscription::new(list.add(counting(&count)), &list);
        assert!(sub.is_active());

        drop(sub);
        assert_eq!(list.len(), 0);
        list.notify("x", &OperationHandle::invalid());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_is_explicit_drop() {
        let list = Arc::new(ObserverList::default());
        let sub = Subscription::new(list.add(counting(&Arc::new(AtomicUsize::new(0)))), &list);
        sub.cancel();
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn subscription_outliving_list_is_inert() {
        let list = Arc::new(ObserverList::default());
        let sub = Subscription::new(list.add(counting(&Arc::new(AtomicUsize::new(0)))), &list);
        drop(list);
        assert!(!sub.is_active());
        drop(sub);
    }

    #[test]
    fn observer_may_unsubscribe_others_during_delivery() {
        let list = Arc::new(ObserverList::default());
        let victim = Arc::new(AtomicUsize::new(0));
        let victim_id = list.add(counting(&victim));

        let list_for_observer = Arc::clone(&list);
        list.add(Arc::new(move |_: &str, _: &OperationHandle| {
            list_for_observer.remove(victim_id);
        }));

        // Snapshot delivery: the victim still sees this event.
        list.notify("x", &OperationHandle::invalid());
        assert_eq!(victim.load(Ordering::SeqCst), 1);

        list.notify("y", &OperationHandle::invalid());
        assert_eq!(victim.load(Ordering::SeqCst), 1);
    }
}
