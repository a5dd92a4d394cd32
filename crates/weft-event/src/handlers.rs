//! Per-event-type handler collections.

use std::{
    any::Any,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;

use crate::{Event, HandlerId, OwnerTag, Priority};

/// Type-erased handler callback.
pub(crate) type Callback<E> = dyn Fn(&E) -> eyre::Result<()> + Send + Sync;

/// One registered subscription.
pub(crate) struct Handler<E> {
    pub(crate) id: HandlerId,
    pub(crate) priority: Priority,
    pub(crate) owner: Option<OwnerTag>,
    pub(crate) callback: Box<Callback<E>>,
}

/// Lazily rebuilt, immutable snapshot.
///
/// `invalidate` drops the current snapshot; the next reader rebuilds it.
/// Readers that already cloned the old `Arc` keep using it, which is how an
/// in-flight publish stays unaffected by concurrent removal.
pub struct SnapshotCache<T> {
    current: Mutex<Option<Arc<[T]>>>,
    rebuilds: AtomicU64,
}

impl<T> SnapshotCache<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// Current snapshot, if still valid.
    #[must_use]
    pub fn get(&self) -> Option<Arc<[T]>> {
        self.current.lock().clone()
    }

    pub fn invalidate(&self) {
        *self.current.lock() = None;
    }

    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.current.lock().is_none()
    }

    /// Install a freshly built snapshot and return it.
    pub fn rebuild(&self, items: Vec<T>) -> Arc<[T]> {
        let snapshot: Arc<[T]> = items.into();
        *self.current.lock() = Some(Arc::clone(&snapshot));
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        snapshot
    }

    /// Return the current snapshot, building it with `build` if stale.
    pub fn get_or_rebuild(&self, build: impl FnOnce() -> Vec<T>) -> Arc<[T]> {
        match self.get() {
            Some(snapshot) => snapshot,
            None => self.rebuild(build()),
        }
    }

    /// Number of rebuilds since creation.
    #[must_use]
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }
}

impl<T> Default for SnapshotCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of handlers in dispatch order.
pub(crate) type HandlerSnapshot<E> = Arc<[Arc<Handler<E>>]>;

/// All subscriptions for one event type.
pub(crate) struct HandlerCollection<E> {
    handlers: Mutex<Vec<Arc<Handler<E>>>>,
    cache: SnapshotCache<Arc<Handler<E>>>,
    len: AtomicUsize,
}

impl<E: Event> HandlerCollection<E> {
    pub(crate) fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            cache: SnapshotCache::new(),
            len: AtomicUsize::new(0),
        }
    }

    pub(crate) fn add(&self, handler: Handler<E>) {
        let mut handlers = self.handlers.lock();
        handlers.push(Arc::new(handler));
        self.len.store(handlers.len(), Ordering::Release);
        self.cache.invalidate();
    }

    /// Remove every handler matching `predicate`, returning how many went.
    fn remove_where(&self, predicate: impl Fn(&Handler<E>) -> bool) -> usize {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|handler| !predicate(handler));
        let removed = before - handlers.len();
        if removed > 0 {
            self.len.store(handlers.len(), Ordering::Release);
            self.cache.invalidate();
        }
        removed
    }

    /// Handlers sorted by priority (descending) then id (ascending).
    ///
    /// Rebuilds under the collection lock when the cache is stale; the lock
    /// is released before the caller invokes anything.
    pub(crate) fn snapshot(&self) -> HandlerSnapshot<E> {
        if let Some(snapshot) = self.cache.get() {
            return snapshot;
        }

        // Another publisher may have rebuilt while we waited for the lock.
        let handlers = self.handlers.lock();
        self.cache.get_or_rebuild(|| {
            let mut sorted = handlers.clone();
            sorted.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
            sorted
        })
    }

    #[cfg(test)]
    pub(crate) const fn cache(&self) -> &SnapshotCache<Arc<Handler<E>>> {
        &self.cache
    }
}

/// Object-safe view of a [`HandlerCollection`] used by the bus registry.
pub(crate) trait AnyHandlers: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn event_name(&self) -> &'static str;
    fn len(&self) -> usize;
    fn remove(&self, id: HandlerId) -> bool;
    fn remove_owner(&self, owner: &OwnerTag) -> usize;
    fn count_owner(&self, owner: &OwnerTag) -> usize;
    fn clear(&self) -> usize;
}

impl<E: Event> AnyHandlers for HandlerCollection<E> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn event_name(&self) -> &'static str {
        E::event_name()
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    fn remove(&self, id: HandlerId) -> bool {
        self.remove_where(|handler| handler.id == id) > 0
    }

    fn remove_owner(&self, owner: &OwnerTag) -> usize {
        self.remove_where(|handler| handler.owner.as_ref() == Some(owner))
    }

    fn count_owner(&self, owner: &OwnerTag) -> usize {
        self.handlers
            .lock()
            .iter()
            .filter(|handler| handler.owner.as_ref() == Some(owner))
            .count()
    }

    fn clear(&self) -> usize {
        self.remove_where(|_| true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping;

    fn handler(id: u64, priority: i32, owner: Option<&str>) -> Handler<Ping> {
        Handler {
            id: HandlerId(id),
            priority: Priority(priority),
            owner: owner.map(OwnerTag::from),
            callback: Box::new(|_| Ok(())),
        }
    }

    fn order(collection: &HandlerCollection<Ping>) -> Vec<u64> {
        collection.snapshot().iter().map(|h| h.id.raw()).collect()
    }

    #[test]
    fn test_snapshot_sorts_by_priority_then_id() {
        let collection = HandlerCollection::new();
        collection.add(handler(0, -100, None));
        collection.add(handler(1, 100, None));
        collection.add(handler(2, 0, None));
        collection.add(handler(3, 100, None));

        assert_eq!(order(&collection), vec![1, 3, 2, 0]);
    }

    #[test]
    fn test_snapshot_is_cached_until_invalidated() {
        let collection = HandlerCollection::new();
        collection.add(handler(0, 0, None));

        let first = collection.snapshot();
        let second = collection.snapshot();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(collection.cache().rebuild_count(), 1);

        collection.add(handler(1, 0, None));
        assert!(collection.cache().is_stale());
        assert_eq!(collection.snapshot().len(), 2);
        assert_eq!(collection.cache().rebuild_count(), 2);

        // The old snapshot is untouched by the later add.
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_removing_nothing_keeps_cache() {
        let collection = HandlerCollection::new();
        collection.add(handler(0, 0, None));
        let _ = collection.snapshot();

        assert!(!collection.remove(HandlerId(42)));
        assert!(!collection.cache().is_stale());
    }

    #[test]
    fn test_owner_removal() {
        let collection = HandlerCollection::new();
        collection.add(handler(0, 0, Some("a")));
        collection.add(handler(1, 0, Some("b")));
        collection.add(handler(2, 0, Some("a")));
        collection.add(handler(3, 0, None));

        let a = OwnerTag::from("a");
        assert_eq!(collection.count_owner(&a), 2);
        assert_eq!(collection.remove_owner(&a), 2);
        assert_eq!(AnyHandlers::len(&collection), 2);
        assert_eq!(order(&collection), vec![1, 3]);
    }

    #[test]
    fn test_standalone_cache_lifecycle() {
        let cache = SnapshotCache::<u32>::new();
        assert!(cache.is_stale());
        assert!(cache.get().is_none());

        let built = cache.rebuild(vec![3, 1, 2]);
        assert_eq!(&*built, &[3, 1, 2]);
        assert!(!cache.is_stale());

        cache.invalidate();
        assert!(cache.get().is_none());
        assert_eq!(cache.rebuild_count(), 1);
    }
}
