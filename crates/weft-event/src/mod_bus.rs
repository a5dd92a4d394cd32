//! Mod-facing event bus.
//!
//! Same dispatch semantics as [`EventBus`], plus:
//! - every subscription is tagged with the owning mod,
//! - cancellations are attributed to the mod whose handler cancelled,
//! - handler timing and failure counters,
//! - one-call teardown when a mod unloads.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tracing::{info, warn};

use crate::{
    Cancellable, Event, EventBus, FaultLog, OwnerTag, Priority, Subscription,
    bus::{DispatchHooks, Dispatched},
    handlers::Handler,
    isolation::{Failure, HandlerOutput, isolate},
};

#[derive(Debug, Clone)]
pub struct ModBusConfig {
    /// Handlers slower than this are logged at `warn`.
    pub slow_handler_threshold: Duration,
    /// Faults retained by the underlying bus.
    pub fault_capacity: usize,
}

impl ModBusConfig {
    #[must_use]
    pub const fn with_slow_handler_threshold(mut self, threshold: Duration) -> Self {
        self.slow_handler_threshold = threshold;
        self
    }

    #[must_use]
    pub const fn with_fault_capacity(mut self, capacity: usize) -> Self {
        self.fault_capacity = capacity;
        self
    }
}

impl Default for ModBusConfig {
    fn default() -> Self {
        Self {
            slow_handler_threshold: Duration::from_millis(5),
            fault_capacity: FaultLog::DEFAULT_CAPACITY,
        }
    }
}

/// Point-in-time copy of the bus counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModBusStats {
    pub events_published: u64,
    pub handlers_invoked: u64,
    pub errors_isolated: u64,
    pub slow_invocations: u64,
    pub total_handler_time: Duration,
}

impl ModBusStats {
    #[must_use]
    pub fn average_handler_time(&self) -> Duration {
        if self.handlers_invoked == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_handler_time.as_nanos() / u128::from(self.handlers_invoked);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

#[derive(Default)]
struct Counters {
    events_published: AtomicU64,
    handlers_invoked: AtomicU64,
    errors_isolated: AtomicU64,
    slow_invocations: AtomicU64,
    handler_nanos: AtomicU64,
}

/// Times each handler and feeds [`Counters`].
struct Timed<'a> {
    counters: &'a Counters,
    slow_threshold: Duration,
}

impl DispatchHooks for Timed<'_> {
    fn invoke<E: Event>(&self, handler: &Handler<E>, event: &E) -> Result<(), Failure> {
        let start = Instant::now();
        let result = isolate(|| (handler.callback)(event));
        let elapsed = start.elapsed();

        self.counters.handlers_invoked.fetch_add(1, Ordering::Relaxed);
        self.counters.handler_nanos.fetch_add(
            u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );

        if elapsed > self.slow_threshold {
            self.counters.slow_invocations.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Slow handler {} ({}) for {}: {:?} (threshold {:?})",
                handler.id,
                handler.owner.as_ref().map_or("unowned", OwnerTag::as_str),
                E::event_name(),
                elapsed,
                self.slow_threshold
            );
        }

        if result.is_err() {
            self.counters.errors_isolated.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

/// Event bus handed to mods.
///
/// Cloning is not provided; share it behind an `Arc` or hand out the
/// underlying [`EventBus`] via [`bus`](Self::bus) for engine-side publishing.
pub struct ModEventBus {
    bus: EventBus,
    config: ModBusConfig,
    counters: Counters,
}

impl ModEventBus {
    #[must_use]
    pub fn new(config: ModBusConfig) -> Self {
        let bus = EventBus::with_fault_capacity(config.fault_capacity);
        Self::with_bus(bus, config)
    }

    /// Layer mod bookkeeping over an existing bus.
    ///
    /// Subscriptions made directly on `bus` are dispatched too, but only
    /// publishes through this wrapper are timed and counted.
    #[must_use]
    pub fn with_bus(bus: EventBus, config: ModBusConfig) -> Self {
        Self {
            bus,
            config,
            counters: Counters::default(),
        }
    }

    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub const fn config(&self) -> &ModBusConfig {
        &self.config
    }

    pub fn subscribe<E, F, R>(&self, owner: impl Into<OwnerTag>, callback: F) -> Subscription
    where
        E: Event,
        F: Fn(&E) -> R + Send + Sync + 'static,
        R: HandlerOutput,
    {
        self.bus.subscribe_owned(owner, Priority::NORMAL, callback)
    }

    pub fn subscribe_with_priority<E, F, R>(
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
        self.bus.subscribe_owned(owner, priority, callback)
    }

    fn hooks(&self) -> Timed<'_> {
        Timed {
            counters: &self.counters,
            slow_threshold: self.config.slow_handler_threshold,
        }
    }

    pub fn publish<E: Event>(&self, event: &E) {
        self.counters.events_published.fetch_add(1, Ordering::Relaxed);
        self.bus.dispatch(event, &self.hooks(), |_| false);
    }

    /// Like [`EventBus::publish_cancellable`]; additionally stamps the
    /// cancelling handler's owner into the event unless the handler already
    /// attributed the cancellation itself.
    pub fn publish_cancellable<E: Cancellable>(&self, event: &E) -> bool {
        if event.is_cancelled() {
            return false;
        }
        self.counters.events_published.fetch_add(1, Ordering::Relaxed);

        match self
            .bus
            .dispatch(event, &self.hooks(), |event: &E| event.is_cancelled())
        {
            Dispatched::Cancelled { owner, handler } => {
                if let Some(owner) = owner {
                    let stamped = event.cancellation().stamp_owner(owner.clone());
                    if stamped {
                        info!("{} cancelled by {} (handler {})", E::event_name(), owner, handler);
                    }
                }
                false
            }
            Dispatched::Completed | Dispatched::NoSubscribers => true,
        }
    }

    /// Remove every subscription owned by `owner`. Returns how many went.
    pub fn clear_mod_subscriptions(&self, owner: &OwnerTag) -> usize {
        let removed = self.bus.remove_owner(owner);
        info!("Removed {} subscriptions for mod {}", removed, owner);
        removed
    }

    #[must_use]
    pub fn owner_subscription_count(&self, owner: &OwnerTag) -> usize {
        self.bus.count_owner(owner)
    }

    #[must_use]
    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.bus.subscriber_count::<E>()
    }

    #[must_use]
    pub fn faults(&self) -> &FaultLog {
        self.bus.faults()
    }

    #[must_use]
    pub fn stats(&self) -> ModBusStats {
        ModBusStats {
            events_published: self.counters.events_published.load(Ordering::Relaxed),
            handlers_invoked: self.counters.handlers_invoked.load(Ordering::Relaxed),
            errors_isolated: self.counters.errors_isolated.load(Ordering::Relaxed),
            slow_invocations: self.counters.slow_invocations.load(Ordering::Relaxed),
            total_handler_time: Duration::from_nanos(
                self.counters.handler_nanos.load(Ordering::Relaxed),
            ),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.events_published.store(0, Ordering::Relaxed);
        self.counters.handlers_invoked.store(0, Ordering::Relaxed);
        self.counters.errors_isolated.store(0, Ordering::Relaxed);
        self.counters.slow_invocations.store(0, Ordering::Relaxed);
        self.counters.handler_nanos.store(0, Ordering::Relaxed);
    }
}

impl Default for ModEventBus {
    fn default() -> Self {
        Self::new(ModBusConfig::default())
    }
}

impl std::fmt::Debug for ModEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModEventBus")
            .field("bus", &self.bus)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cancellation;

    struct Chat;

    struct Interact {
        cancel: Cancellation,
    }

    impl Cancellable for Interact {
        fn cancellation(&self) -> &Cancellation {
            &self.cancel
        }
    }

    #[test]
    fn test_counts_invocations_and_errors() {
        let bus = ModEventBus::default();
        let _a = bus.subscribe("mod.a", |_: &Chat| ());
        let _b = bus.subscribe("mod.b", |_: &Chat| -> eyre::Result<()> {
            Err(eyre::eyre!("nope"))
        });

        bus.publish(&Chat);
        bus.publish(&Chat);

        let stats = bus.stats();
        assert_eq!(stats.events_published, 2);
        assert_eq!(stats.handlers_invoked, 4);
        assert_eq!(stats.errors_isolated, 2);
        assert_eq!(bus.faults().total(), 2);

        bus.reset_stats();
        assert_eq!(bus.stats(), ModBusStats::default());
    }

    #[test]
    fn test_slow_handlers_are_counted() {
        let bus = ModEventBus::new(
            ModBusConfig::default().with_slow_handler_threshold(Duration::from_millis(1)),
        );
        let _sub = bus.subscribe("mod.slow", |_: &Chat| {
            std::thread::sleep(Duration::from_millis(5));
        });

        bus.publish(&Chat);
        let stats = bus.stats();
        assert_eq!(stats.slow_invocations, 1);
        assert!(stats.average_handler_time() >= Duration::from_millis(5));
    }

    #[test]
    fn test_cancellation_is_attributed_to_owner() {
        let bus = ModEventBus::default();
        let _sub = bus.subscribe("mod.guard", |event: &Interact| {
            event.cancel("protected");
        });

        let event = Interact {
            cancel: Cancellation::new(),
        };
        assert!(!bus.publish_cancellable(&event));
        assert_eq!(
            event.cancel.cancelled_by().map(OwnerTag::as_str),
            Some("mod.guard")
        );
        assert_eq!(event.cancel.reason(), Some("protected"));
    }

    #[test]
    fn test_precancelled_event_is_not_counted() {
        let bus = ModEventBus::default();
        let _sub = bus.subscribe("mod.a", |_: &Interact| ());

        let event = Interact {
            cancel: Cancellation::new(),
        };
        event.cancel("early");
        assert!(!bus.publish_cancellable(&event));

        let stats = bus.stats();
        assert_eq!(stats.events_published, 0);
        assert_eq!(stats.handlers_invoked, 0);
    }

    #[test]
    fn test_average_of_nothing_is_zero() {
        assert_eq!(ModBusStats::default().average_handler_time(), Duration::ZERO);
    }
}
