#![allow(clippy::redundant_pub_crate)]
#![allow(clippy::missing_fields_in_debug)]

//! Weft event buses.
//!
//! Two synchronous publish/subscribe channels:
//!
//! - [`EventBus`]: engine-internal. Handlers run on the publishing thread
//!   in priority order (highest first, ties by subscription order).
//! - [`ModEventBus`]: the same dispatch, with subscriptions tagged by the
//!   owning mod, cancellation attribution, timing stats and bulk teardown.
//!
//! A handler that returns an error or panics is isolated: the failure is
//! logged, recorded in the bus [`FaultLog`], and the remaining handlers
//! still run.
//!
//! # Example
//!
//! ```ignore
//! struct PlayerJoined { name: String }
//!
//! let bus = EventBus::new();
//! let sub = bus.subscribe_with_priority(Priority::HIGH, |event: &PlayerJoined| {
//!     tracing::info!("{} joined", event.name);
//! });
//!
//! bus.publish(&PlayerJoined { name: "alex".into() });
//! sub.dispose();
//! ```

mod bus;
mod cancel;
mod event;
mod handlers;
mod isolation;
mod mod_bus;

pub use bus::{EventBus, Subscription, SubscriptionGuard};
pub use cancel::{Cancellable, Cancellation};
pub use event::{Event, HandlerId, OwnerTag, Priority};
pub use handlers::SnapshotCache;
pub use isolation::{
    Failure, Fault, FaultKind, FaultLog, FaultOrigin, HandlerOutput, isolate, panic_message,
};
pub use mod_bus::{ModBusConfig, ModBusStats, ModEventBus};

pub mod prelude {
    pub use crate::{
        Cancellable, Cancellation, Event, EventBus, ModEventBus, OwnerTag, Priority, Subscription,
    };
}
