//! Event marker trait and the small value types used by subscriptions.

use std::{fmt, sync::Arc};

/// Marker trait for event payloads.
///
/// Any `Send + Sync + 'static` type can be published. Handlers receive a
/// shared reference; events that need to be vetoed embed a
/// [`Cancellation`](crate::Cancellation) and implement
/// [`Cancellable`](crate::Cancellable).
pub trait Event: Send + Sync + 'static {
    /// Type name used in logs and fault records.
    fn event_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

// Blanket implementation: any Send + Sync + 'static type can be an event
impl<T: Send + Sync + 'static> Event for T {}

/// Monotonic subscription identifier, unique per bus.
///
/// Equal-priority handlers run in ascending id order, i.e. in the order
/// they subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(pub(crate) u64);

impl HandlerId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handler priority. Higher values run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub i32);

impl Priority {
    pub const LOWEST: Self = Self(-200);
    pub const LOW: Self = Self(-100);
    pub const NORMAL: Self = Self(0);
    pub const HIGH: Self = Self(100);
    pub const HIGHEST: Self = Self(200);
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

/// Identifies who registered a subscription (a mod, a script unit).
///
/// Used for bulk teardown and for attributing cancellations.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerTag(Arc<str>);

impl OwnerTag {
    pub fn new(tag: impl Into<Arc<str>>) -> Self {
        Self(tag.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OwnerTag {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for OwnerTag {
    fn from(tag: String) -> Self {
        Self::new(tag)
    }
}

impl fmt::Debug for OwnerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerTag({:?})", &*self.0)
    }
}

impl fmt::Display for OwnerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
