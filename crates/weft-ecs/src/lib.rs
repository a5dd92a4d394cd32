//! Weft ECS - the component store consumed by the Weft scheduling core.
//!
//! This crate is deliberately small: it provides exactly the storage
//! contract the scheduler and the parallel query executor rely on.
//!
//! # Key Concepts
//!
//! - **Entity**: a generational handle
//! - **Component**: any `Send + Sync + 'static` value attached to an entity
//! - **ComponentId**: the unit of conflict analysis
//! - **ConcurrentWrite**: static capability declaring a component safe for
//!   concurrent mutation across entities
//! - **Query**: a presence filter (`read`, `write`, `with`, `without`)
//!
//! # Access Patterns
//!
//! - `count_matching(query)` / `for_each(query, visitor)` - single-threaded enumeration
//! - `component::<T>(entity)` - shared borrow, error if missing
//! - `try_component::<T>(entity)` - shared borrow, `None` if missing
//! - `component_mut::<T>(entity)` - exclusive borrow through `&World`
//!
//! Concurrent calls from several threads are sound for any access pattern,
//! but they only avoid borrow errors when the accessed component types do
//! not overlap, which is what the scheduler's conflict analysis enforces.

mod column;
mod component;
mod entity;
mod error;
mod query;
mod world;

pub use component::{Component, ComponentId, ComponentInfo, ComponentRegistry, ConcurrentWrite};
pub use entity::{Entity, EntityAllocator, EntityIndex, Generation};
pub use error::{EcsError, EcsResult};
pub use query::{Query, QueryTerm, TermAccess};
pub use world::{EntityRef, Ref, RefMut, World};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{Component, ComponentId, ConcurrentWrite, Entity, EntityRef, Query, World};
}
