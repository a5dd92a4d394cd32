//! Conflict analysis between component-access declarations.
//!
//! Two systems conflict when one writes a component the other reads or
//! writes. Read/read overlap is never a conflict.

use std::fmt;

use tracing::warn;
use weft_ecs::{ComponentId, ComponentRegistry};

use crate::access::SystemAccess;

/// Whether `a` and `b` must not run concurrently. Symmetric.
#[must_use]
pub fn conflicts_with(a: &SystemAccess, b: &SystemAccess) -> bool {
    !a.writes().is_disjoint(b.writes())
        || !a.writes().is_disjoint(b.reads())
        || !b.writes().is_disjoint(a.reads())
}

/// Components behind a conflict between `a` and `b`, deduplicated.
#[must_use]
pub fn conflicting_components(a: &SystemAccess, b: &SystemAccess) -> Vec<ComponentId> {
    let mut shared: Vec<ComponentId> = a
        .writes()
        .iter()
        .filter(|id| b.reads().contains(*id) || b.writes().contains(*id))
        .chain(b.writes().iter().filter(|id| a.reads().contains(*id)))
        .copied()
        .collect();
    shared.sort_unstable();
    shared.dedup();
    shared
}

/// Whether `component` may be mutated from several threads at once
/// (different entities, same type).
///
/// Only types registered through
/// [`ComponentRegistry::register_concurrent`] qualify; unregistered
/// components are never safe.
#[must_use]
pub fn is_safe_for_concurrent_write(component: ComponentId, registry: &ComponentRegistry) -> bool {
    registry
        .get(component)
        .is_some_and(weft_ecs::ComponentInfo::is_concurrent_write)
}

/// Outcome of [`validate_system_thread_safety`]. Diagnostic only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadSafetyReport {
    pub is_safe: bool,
    pub unsafe_components: Vec<ComponentId>,
    pub issues: Vec<String>,
}

impl ThreadSafetyReport {
    /// Downgrade `access` to exclusive execution if the report is unsafe.
    ///
    /// Returns whether anything changed.
    pub fn apply(&self, system: &str, access: &mut SystemAccess) -> bool {
        if self.is_safe || !access.allows_parallel() {
            return false;
        }
        warn!(
            "System {} writes components without concurrent-write support ({}); running it exclusively",
            system,
            self.issues.join("; ")
        );
        access.set_allows_parallel(false);
        true
    }
}

impl fmt::Display for ThreadSafetyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_safe {
            return f.write_str("thread-safe");
        }
        write!(f, "not thread-safe: {}", self.issues.join("; "))
    }
}

/// Check that every written component supports concurrent writes.
#[must_use]
pub fn validate_system_thread_safety(
    access: &SystemAccess,
    registry: &ComponentRegistry,
) -> ThreadSafetyReport {
    let mut report = ThreadSafetyReport {
        is_safe: true,
        ..ThreadSafetyReport::default()
    };

    for &component in access.writes() {
        match registry.get(component) {
            None => {
                report.unsafe_components.push(component);
                report
                    .issues
                    .push(format!("{} is not registered", component.short_name()));
            }
            Some(info) if !info.is_concurrent_write() => {
                report.unsafe_components.push(component);
                report.issues.push(format!(
                    "{} does not implement ConcurrentWrite",
                    component.short_name()
                ));
            }
            Some(_) => {}
        }
    }

    report.is_safe = report.unsafe_components.is_empty();
    report
}
