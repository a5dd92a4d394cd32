//! Failure isolation boundary shared by the event bus and the scheduler.
//!
//! User code (event handlers, systems) runs inside [`isolate`]. Both an
//! `Err` return and a panic are turned into a [`Failure`]; the caller logs
//! it with its own identity and records a [`Fault`] in a [`FaultLog`], so
//! tests can assert on how many failures were swallowed instead of
//! scraping logs.

use std::{
    any::Any,
    borrow::Cow,
    collections::VecDeque,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::atomic::{AtomicU64, Ordering},
    time::SystemTime,
};

use parking_lot::Mutex;

use crate::{HandlerId, OwnerTag};

/// Return types accepted from handlers and systems.
pub trait HandlerOutput {
    fn into_result(self) -> eyre::Result<()>;
}

impl HandlerOutput for () {
    fn into_result(self) -> eyre::Result<()> {
        Ok(())
    }
}

impl HandlerOutput for eyre::Result<()> {
    fn into_result(self) -> eyre::Result<()> {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The callee returned an error.
    Error,
    /// The callee panicked.
    Panic,
}

/// A failure caught at the isolation boundary, before attribution.
#[derive(Debug, Clone)]
pub struct Failure {
    pub kind: FaultKind,
    pub message: String,
}

impl Failure {
    #[must_use]
    pub fn into_fault(self, origin: FaultOrigin) -> Fault {
        Fault {
            origin,
            kind: self.kind,
            message: self.message,
            at: SystemTime::now(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FaultKind::Error => write!(f, "{}", self.message),
            FaultKind::Panic => write!(f, "panicked: {}", self.message),
        }
    }
}

/// Run `f`, converting errors and panics into a [`Failure`].
pub fn isolate<R: HandlerOutput>(f: impl FnOnce() -> R) -> Result<(), Failure> {
    match catch_unwind(AssertUnwindSafe(|| f().into_result())) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(report)) => Err(Failure {
            kind: FaultKind::Error,
            message: format!("{report:#}"),
        }),
        Err(payload) => Err(Failure {
            kind: FaultKind::Panic,
            message: panic_message(payload.as_ref()),
        }),
    }
}

/// Best-effort text of a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}

/// Where an isolated failure came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultOrigin {
    System {
        name: Cow<'static, str>,
    },
    Handler {
        event: &'static str,
        handler: HandlerId,
        owner: Option<OwnerTag>,
    },
}

impl fmt::Display for FaultOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System { name } => write!(f, "system {name}"),
            Self::Handler {
                event,
                handler,
                owner: Some(owner),
            } => write!(f, "handler {handler} of {owner} for {event}"),
            Self::Handler { event, handler, .. } => write!(f, "handler {handler} for {event}"),
        }
    }
}

/// Structured record of one isolated failure.
#[derive(Debug, Clone)]
pub struct Fault {
    pub origin: FaultOrigin,
    pub kind: FaultKind,
    pub message: String,
    pub at: SystemTime,
}

/// Bounded, thread-safe sink of recent faults.
///
/// Keeps the newest `capacity` records; `total()` counts every fault ever
/// recorded, including evicted ones.
pub struct FaultLog {
    entries: Mutex<VecDeque<Fault>>,
    capacity: usize,
    total: AtomicU64,
}

impl FaultLog {
    pub const DEFAULT_CAPACITY: usize = 256;

    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(Self::DEFAULT_CAPACITY))),
            capacity,
            total: AtomicU64::new(0),
        }
    }

    pub fn record(&self, fault: Fault) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if self.capacity == 0 {
            return;
        }

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(fault);
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of the retained faults, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Fault> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Take the retained faults, oldest first.
    pub fn drain(&self) -> Vec<Fault> {
        self.entries.lock().drain(..).collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        self.total.store(0, Ordering::Relaxed);
    }
}

impl Default for FaultLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl fmt::Debug for FaultLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultLog")
            .field("retained", &self.len())
            .field("capacity", &self.capacity)
            .field("total", &self.total())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system_origin() -> FaultOrigin {
        FaultOrigin::System {
            name: Cow::Borrowed("movement"),
        }
    }

    #[test]
    fn test_isolate_passes_success() {
        assert!(isolate(|| ()).is_ok());
        assert!(isolate(|| -> eyre::Result<()> { Ok(()) }).is_ok());
    }

    #[test]
    fn test_isolate_captures_errors() {
        let failure = isolate(|| -> eyre::Result<()> { Err(eyre::eyre!("boom")) }).unwrap_err();
        assert_eq!(failure.kind, FaultKind::Error);
        assert_eq!(failure.message, "boom");
    }

    #[test]
    fn test_isolate_captures_panics() {
        let failure = isolate::<()>(|| panic!("exploded {}", 42)).unwrap_err();
        assert_eq!(failure.kind, FaultKind::Panic);
        assert_eq!(failure.message, "exploded 42");
        assert_eq!(failure.to_string(), "panicked: exploded 42");
    }

    #[test]
    fn test_log_evicts_oldest_but_counts_all() {
        let log = FaultLog::new(2);
        for i in 0..3 {
            log.record(
                Failure {
                    kind: FaultKind::Error,
                    message: i.to_string(),
                }
                .into_fault(system_origin()),
            );
        }

        assert_eq!(log.total(), 3);
        let retained: Vec<_> = log.snapshot().into_iter().map(|f| f.message).collect();
        assert_eq!(retained, vec!["1", "2"]);

        assert_eq!(log.drain().len(), 2);
        assert!(log.is_empty());
        assert_eq!(log.total(), 3);
    }

    #[test]
    fn test_origin_display() {
        let origin = FaultOrigin::Handler {
            event: "Damage",
            handler: HandlerId(3),
            owner: Some(OwnerTag::from("mod.a")),
        };
        assert_eq!(origin.to_string(), "handler #3 of mod.a for Damage");
        assert_eq!(system_origin().to_string(), "system movement");
    }
}
