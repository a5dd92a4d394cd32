//! Component-access declarations.

use std::collections::BTreeSet;

use weft_ecs::{Component, ComponentId, Query};

/// Well-known system priorities. Lower values run earlier.
pub mod priority {
    pub const FIRST: i32 = -1000;
    pub const EARLY: i32 = -100;
    pub const NORMAL: i32 = 0;
    pub const LATE: i32 = 100;
    pub const LAST: i32 = 1000;
}

/// Which components a system reads and writes, plus its scheduling hints.
///
/// ```ignore
/// let access = SystemAccess::new()
///     .read::<Position>()
///     .write::<Velocity>()
///     .with_priority(priority::EARLY);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemAccess {
    reads: BTreeSet<ComponentId>,
    writes: BTreeSet<ComponentId>,
    priority: i32,
    allows_parallel: bool,
}

impl Default for SystemAccess {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemAccess {
    /// No reads, no writes, normal priority, parallel allowed.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            reads: BTreeSet::new(),
            writes: BTreeSet::new(),
            priority: priority::NORMAL,
            allows_parallel: true,
        }
    }

    #[must_use]
    pub fn read<T: Component>(self) -> Self {
        self.read_id(ComponentId::of::<T>())
    }

    #[must_use]
    pub fn write<T: Component>(self) -> Self {
        self.write_id(ComponentId::of::<T>())
    }

    #[must_use]
    pub fn read_id(mut self, id: ComponentId) -> Self {
        self.reads.insert(id);
        self
    }

    #[must_use]
    pub fn write_id(mut self, id: ComponentId) -> Self {
        self.writes.insert(id);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Force the system into a stage of its own.
    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.allows_parallel = false;
        self
    }

    /// Access implied by a query: `read` terms become reads, `write` terms
    /// become writes. Presence filters (`with`, `without`) touch no data.
    #[must_use]
    pub fn from_query(query: &Query) -> Self {
        Self::new().merge_query(query)
    }

    /// Add the reads and writes of `query` to this declaration.
    #[must_use]
    pub fn merge_query(mut self, query: &Query) -> Self {
        self.reads.extend(query.reads());
        self.writes.extend(query.writes());
        self
    }

    #[must_use]
    pub const fn reads(&self) -> &BTreeSet<ComponentId> {
        &self.reads
    }

    #[must_use]
    pub const fn writes(&self) -> &BTreeSet<ComponentId> {
        &self.writes
    }

    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    #[must_use]
    pub const fn allows_parallel(&self) -> bool {
        self.allows_parallel
    }

    pub fn set_allows_parallel(&mut self, allows_parallel: bool) {
        self.allows_parallel = allows_parallel;
    }

    /// Every component touched, reads and writes.
    pub fn touched(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.reads.union(&self.writes).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position;
    struct Velocity;
    struct Frozen;

    #[test]
    fn test_builder_collects_sets() {
        let access = SystemAccess::new()
            .read::<Position>()
            .write::<Velocity>()
            .with_priority(priority::LATE)
            .exclusive();

        assert!(access.reads().contains(&ComponentId::of::<Position>()));
        assert!(access.writes().contains(&ComponentId::of::<Velocity>()));
        assert_eq!(access.priority(), priority::LATE);
        assert!(!access.allows_parallel());
        assert_eq!(access.touched().count(), 2);
    }

    #[test]
    fn test_from_query_ignores_filters() {
        let query = Query::new()
            .read::<Position>()
            .write::<Velocity>()
            .without::<Frozen>();
        let access = SystemAccess::from_query(&query);

        assert_eq!(access.reads().len(), 1);
        assert_eq!(access.writes().len(), 1);
        assert!(!access.touched().any(|id| id == ComponentId::of::<Frozen>()));
    }

    #[test]
    fn test_duplicate_declarations_collapse() {
        let access = SystemAccess::new().read::<Position>().read::<Position>();
        assert_eq!(access.reads().len(), 1);
    }
}
