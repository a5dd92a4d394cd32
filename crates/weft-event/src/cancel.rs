//! Cooperative cancellation for events that handlers may veto.

use std::sync::{
    OnceLock,
    atomic::{AtomicBool, Ordering},
};

use crate::{Event, OwnerTag};

/// Cancellation state embedded in a cancellable event.
///
/// Handlers only get `&E`, so the state uses interior mutability. The
/// flag is sticky: once set it cannot be cleared through a shared
/// reference. The first reason and the first attributed owner win.
#[derive(Debug, Default)]
pub struct Cancellation {
    cancelled: AtomicBool,
    reason: OnceLock<String>,
    cancelled_by: OnceLock<OwnerTag>,
}

impl Cancellation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn cancel_with_reason(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.cancel();
    }

    /// Cancel and attribute the veto explicitly.
    pub fn cancel_as(&self, owner: OwnerTag, reason: impl Into<String>) {
        let _ = self.cancelled_by.set(owner);
        self.cancel_with_reason(reason);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }

    #[must_use]
    pub fn cancelled_by(&self) -> Option<&OwnerTag> {
        self.cancelled_by.get()
    }

    /// Attribute the cancellation unless someone already did.
    /// Returns whether the tag was stored.
    pub(crate) fn stamp_owner(&self, owner: OwnerTag) -> bool {
        self.cancelled_by.set(owner).is_ok()
    }

    /// Clear everything so the event value can be published again.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Events that carry a [`Cancellation`].
///
/// ```ignore
/// struct BlockBreak { pos: BlockPos, cancel: Cancellation }
///
/// impl Cancellable for BlockBreak {
///     fn cancellation(&self) -> &Cancellation { &self.cancel }
/// }
/// ```
pub trait Cancellable: Event {
    fn cancellation(&self) -> &Cancellation;

    fn is_cancelled(&self) -> bool {
        self.cancellation().is_cancelled()
    }

    fn cancel(&self, reason: impl Into<String>)
    where
        Self: Sized,
    {
        self.cancellation().cancel_with_reason(reason);
    }
}
