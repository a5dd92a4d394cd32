//! Engine-internal event bus.
//!
//! # Dispatch
//!
//! ```text
//! publish(&event)
//!   ├─ no collection / zero handlers → return
//!   ├─ snapshot (cached; rebuilt under the collection lock when stale)
//!   └─ for handler in snapshot (priority desc, handler id asc):
//!        isolate(handler) → on failure: log + FaultLog, keep going
//!        cancellable? → stop once the event is cancelled
//! ```
//!
//! Handlers always run on the publishing thread. No lock is held while a
//! handler runs, so handlers may subscribe, unsubscribe and publish.

use std::{
    any::TypeId,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::{debug, error};

use crate::{
    Cancellable, Event, HandlerId, OwnerTag, Priority,
    handlers::{AnyHandlers, Handler, HandlerCollection},
    isolation::{Failure, FaultLog, FaultOrigin, HandlerOutput, isolate},
};

/// Shared bus state (behind `Arc`).
pub(crate) struct BusInner {
    collections: RwLock<HashMap<TypeId, Box<dyn AnyHandlers>>>,
    next_handler_id: AtomicU64,
    faults: FaultLog,
}

/// Cloneable handle to a priority-ordered publish/subscribe channel.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// How a single handler invocation is wrapped.
pub(crate) trait DispatchHooks {
    fn invoke<E: Event>(&self, handler: &Handler<E>, event: &E) -> Result<(), Failure>;
}

/// Plain isolation, no instrumentation.
pub(crate) struct Isolated;

impl DispatchHooks for Isolated {
    fn invoke<E: Event>(&self, handler: &Handler<E>, event: &E) -> Result<(), Failure> {
        isolate(|| (handler.callback)(event))
    }
}

/// Result of one dispatch pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Dispatched {
    NoSubscribers,
    Completed,
    Cancelled {
        handler: HandlerId,
        owner: Option<OwnerTag>,
    },
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_fault_capacity(FaultLog::DEFAULT_CAPACITY)
    }

    /// Bus whose fault log retains at most `capacity` records.
    #[must_use]
    pub fn with_fault_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                collections: RwLock::new(HashMap::new()),
                next_handler_id: AtomicU64::new(0),
                faults: FaultLog::new(capacity),
            }),
        }
    }

    // ==================== Subscribe ====================

    /// Subscribe at [`Priority::NORMAL`].
    pub fn subscribe<E, F, R>(&self, callback: F) -> Subscription
    where
        E: Event,
        F: Fn(&E) -> R + Send + Sync + 'static,
        R: HandlerOutput,
    {
        self.subscribe_inner(Priority::NORMAL, None, callback)
    }

    pub fn subscribe_with_priority<E, F, R>(
        &self,
        priority: impl Into<Priority>,
        callback: F,
    ) -> Subscription
    where
        E: Event,
        F: Fn(&E) -> R + Send + Sync + 'static,
        R: HandlerOutput,
    {
        self.subscribe_inner(priority.into(), None, callback)
    }

    /// Subscribe on behalf of an owner, enabling bulk teardown.
    pub fn subscribe_owned<E, F, R>(
        &self,
        owner: impl Into<OwnerTag>,
        priority: impl Into<Priority>,
        callback: F,
    ) -> Subscription
    where
        E: Event,
        F: Fn(&E) -> R + Send + Sync + 'static,
        R: HandlerOutput,
    {
        self.subscribe_inner(priority.into(), Some(owner.into()), callback)
    }

    fn subscribe_inner<E, F, R>(
        &self,
        priority: Priority,
        owner: Option<OwnerTag>,
        callback: F,
    ) -> Subscription
    where
        E: Event,
        F: Fn(&E) -> R + Send + Sync + 'static,
        R: HandlerOutput,
    {
        let id = HandlerId(self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed));
        let handler = Handler {
            id,
            priority,
            owner,
            callback: Box::new(move |event: &E| callback(event).into_result()),
        };

        let type_id = TypeId::of::<E>();
        {
            let collections = self.inner.collections.read();
            if let Some(collection) = collections.get(&type_id) {
                typed::<E>(&**collection).add(handler);
                return Subscription::new(&self.inner, type_id, id);
            }
        }

        self.inner
            .collections
            .write()
            .entry(type_id)
            .or_insert_with(|| Box::new(HandlerCollection::<E>::new()));
        // Re-read: the entry may have been created by another subscriber.
        let collections = self.inner.collections.read();
        if let Some(collection) = collections.get(&type_id) {
            typed::<E>(&**collection).add(handler);
        }
        Subscription::new(&self.inner, type_id, id)
    }

    // ==================== Publish ====================

    /// Deliver `event` to every subscriber of `E`.
    ///
    /// Failing handlers are logged and recorded in [`faults`](Self::faults);
    /// they never stop later handlers and never reach the caller.
    pub fn publish<E: Event>(&self, event: &E) {
        self.dispatch(event, &Isolated, |_| false);
    }

    /// Deliver a cancellable event, stopping at the first cancellation.
    ///
    /// Returns `false` if the event ended up cancelled (including when it
    /// was already cancelled on entry, in which case nothing runs).
    pub fn publish_cancellable<E: Cancellable>(&self, event: &E) -> bool {
        if event.is_cancelled() {
            return false;
        }
        !matches!(
            self.dispatch(event, &Isolated, |event: &E| event.is_cancelled()),
            Dispatched::Cancelled { .. }
        )
    }

    pub(crate) fn dispatch<E, H>(
        &self,
        event: &E,
        hooks: &H,
        cancelled: impl Fn(&E) -> bool,
    ) -> Dispatched
    where
        E: Event,
        H: DispatchHooks,
    {
        let snapshot = {
            let collections = self.inner.collections.read();
            let Some(collection) = collections.get(&TypeId::of::<E>()) else {
                return Dispatched::NoSubscribers;
            };
            if collection.len() == 0 {
                return Dispatched::NoSubscribers;
            }
            typed::<E>(&**collection).snapshot()
        };

        for handler in snapshot.iter() {
            if let Err(failure) = hooks.invoke(&**handler, event) {
                error!(
                    event = E::event_name(),
                    handler = %handler.id,
                    owner = ?handler.owner,
                    "event handler failed: {failure}"
                );
                self.inner.faults.record(failure.into_fault(FaultOrigin::Handler {
                    event: E::event_name(),
                    handler: handler.id,
                    owner: handler.owner.clone(),
                }));
            }

            if cancelled(event) {
                return Dispatched::Cancelled {
                    handler: handler.id,
                    owner: handler.owner.clone(),
                };
            }
        }

        Dispatched::Completed
    }

    // ==================== Diagnostics / teardown ====================

    #[must_use]
    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.inner
            .collections
            .read()
            .get(&TypeId::of::<E>())
            .map_or(0, |collection| collection.len())
    }

    /// Total subscriptions across all event types.
    #[must_use]
    pub fn total_subscriber_count(&self) -> usize {
        self.inner
            .collections
            .read()
            .values()
            .map(|collection| collection.len())
            .sum()
    }

    /// Drop every subscription for `E`. Returns how many were removed.
    ///
    /// A publish already running keeps its snapshot and finishes normally.
    pub fn clear_subscriptions<E: Event>(&self) -> usize {
        let removed = self
            .inner
            .collections
            .read()
            .get(&TypeId::of::<E>())
            .map_or(0, |collection| collection.clear());
        debug!("Cleared {} subscriptions for {}", removed, E::event_name());
        removed
    }

    pub fn clear_all_subscriptions(&self) -> usize {
        let removed = self
            .inner
            .collections
            .read()
            .values()
            .map(|collection| collection.clear())
            .sum();
        debug!("Cleared {} subscriptions across all event types", removed);
        removed
    }

    /// Remove every subscription registered under `owner`, for any event type.
    pub(crate) fn remove_owner(&self, owner: &OwnerTag) -> usize {
        self.inner
            .collections
            .read()
            .values()
            .map(|collection| collection.remove_owner(owner))
            .sum()
    }

    pub(crate) fn count_owner(&self, owner: &OwnerTag) -> usize {
        self.inner
            .collections
            .read()
            .values()
            .map(|collection| collection.count_owner(owner))
            .sum()
    }

    /// Faults isolated by this bus.
    #[must_use]
    pub fn faults(&self) -> &FaultLog {
        &self.inner.faults
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let collections = self.inner.collections.read();
        let mut map = f.debug_map();
        for collection in collections.values() {
            map.entry(&collection.event_name(), &collection.len());
        }
        map.finish()
    }
}

fn typed<E: Event>(collection: &dyn AnyHandlers) -> &HandlerCollection<E> {
    collection
        .as_any()
        .downcast_ref::<HandlerCollection<E>>()
        .unwrap_or_else(|| unreachable!("collection keyed by its own event TypeId"))
}

/// Handle to one subscription.
///
/// Dropping the handle does **not** unsubscribe; call
/// [`dispose`](Self::dispose), or convert it with
/// [`into_guard`](Self::into_guard) for scope-bound subscriptions.
#[must_use = "keep the handle to be able to unsubscribe later"]
pub struct Subscription {
    bus: Weak<BusInner>,
    event: TypeId,
    id: HandlerId,
    disposed: AtomicBool,
}

impl Subscription {
    fn new(inner: &Arc<BusInner>, event: TypeId, id: HandlerId) -> Self {
        Self {
            bus: Arc::downgrade(inner),
            event,
            id,
            disposed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn id(&self) -> HandlerId {
        self.id
    }

    /// Remove this subscription. Idempotent; returns `true` only for the
    /// call that actually removed it.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let Some(bus) = self.bus.upgrade() else {
            return false;
        };
        bus.collections
            .read()
            .get(&self.event)
            .is_some_and(|collection| collection.remove(self.id))
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Convert into a guard that disposes on drop.
    pub fn into_guard(self) -> SubscriptionGuard {
        SubscriptionGuard(self)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Scope-bound subscription; unsubscribes when dropped.
#[must_use = "dropping the guard unsubscribes immediately"]
#[derive(Debug)]
pub struct SubscriptionGuard(Subscription);

impl SubscriptionGuard {
    #[must_use]
    pub const fn id(&self) -> HandlerId {
        self.0.id
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.0.dispose();
    }
}
