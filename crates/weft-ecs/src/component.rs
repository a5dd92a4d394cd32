//! Component identities and registration metadata.
//!
//! Conflict analysis works on [`ComponentId`]s, which are derived from the
//! Rust type alone so systems can declare their access before any world
//! exists. The [`ComponentRegistry`] additionally records whether a type
//! declared the [`ConcurrentWrite`] capability.

use std::{
    any::{TypeId, type_name},
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    mem,
};

use hashbrown::HashMap;

/// Marker trait for types that can be stored as components.
pub trait Component: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Component for T {}

/// Capability: a component whose values may be mutated concurrently, one
/// entity per worker.
///
/// The `Copy` bound is the static check: `Copy` types cannot own heap
/// allocations, collections or shared mutable state, so every value is a
/// self-contained aggregate. Immutable `&'static str` fields remain allowed.
///
/// ```ignore
/// #[derive(Clone, Copy)]
/// struct Position { x: f32, y: f32 }
///
/// impl ConcurrentWrite for Position {}
/// ```
pub trait ConcurrentWrite: Component + Copy {}

/// Identity of a component type.
///
/// Equality, ordering and hashing use the `TypeId` only; the name is kept
/// for diagnostics.
#[derive(Clone, Copy)]
pub struct ComponentId {
    type_id: TypeId,
    name: &'static str,
}

impl ComponentId {
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    #[must_use]
    pub const fn type_id(self) -> TypeId {
        self.type_id
    }

    /// Full type path.
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.name
    }

    /// Type name without its module path.
    #[must_use]
    pub fn short_name(self) -> &'static str {
        let name = self.name.split('<').next().unwrap_or(self.name);
        name.rsplit("::").next().unwrap_or(name)
    }
}

impl PartialEq for ComponentId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ComponentId {}

impl Hash for ComponentId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl PartialOrd for ComponentId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ComponentId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_id.cmp(&other.type_id)
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.short_name())
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Registration metadata for one component type.
#[derive(Clone, Debug)]
pub struct ComponentInfo {
    id: ComponentId,
    size: usize,
    concurrent_write: bool,
}

impl ComponentInfo {
    #[must_use]
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.id.name
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Whether the type declared [`ConcurrentWrite`].
    #[must_use]
    pub const fn is_concurrent_write(&self) -> bool {
        self.concurrent_write
    }
}

/// Registry of known component types.
#[derive(Default, Debug)]
pub struct ComponentRegistry {
    infos: HashMap<ComponentId, ComponentInfo>,
}

impl ComponentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plain component. Idempotent; never downgrades a type
    /// previously registered as [`ConcurrentWrite`].
    pub fn register<T: Component>(&mut self) -> ComponentId {
        let id = ComponentId::of::<T>();
        self.infos.entry(id).or_insert_with(|| ComponentInfo {
            id,
            size: mem::size_of::<T>(),
            concurrent_write: false,
        });
        id
    }

    /// Register a component together with its concurrent-write capability.
    pub fn register_concurrent<T: ConcurrentWrite>(&mut self) -> ComponentId {
        let id = ComponentId::of::<T>();
        self.infos
            .entry(id)
            .or_insert_with(|| ComponentInfo {
                id,
                size: mem::size_of::<T>(),
                concurrent_write: true,
            })
            .concurrent_write = true;
        id
    }

    #[must_use]
    pub fn get(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.infos.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: ComponentId) -> bool {
        self.infos.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy)]
    struct Position {
        x: f32,
        y: f32,
    }

    impl ConcurrentWrite for Position {}

    struct Inventory(Vec<u32>);

    #[test]
    fn test_ids_compare_by_type() {
        assert_eq!(ComponentId::of::<Position>(), ComponentId::of::<Position>());
        assert_ne!(ComponentId::of::<Position>(), ComponentId::of::<Inventory>());
        assert_eq!(ComponentId::of::<Position>().short_name(), "Position");
    }

    #[test]
    fn test_registration_is_idempotent() {
        let mut registry = ComponentRegistry::new();
        let a = registry.register::<Inventory>();
        let b = registry.register::<Inventory>();
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
        assert!(!registry.get(a).unwrap().is_concurrent_write());
    }

    #[test]
    fn test_concurrent_capability_survives_plain_registration() {
        let mut registry = ComponentRegistry::new();
        let id = registry.register_concurrent::<Position>();
        registry.register::<Position>();

        let info = registry.get(id).unwrap();
        assert!(info.is_concurrent_write());
        assert_eq!(info.size(), mem::size_of::<Position>());
    }

    #[test]
    fn test_concurrent_registration_upgrades_plain() {
        let mut registry = ComponentRegistry::new();
        let id = registry.register::<Position>();
        registry.register_concurrent::<Position>();
        assert!(registry.get(id).unwrap().is_concurrent_write());
    }
}
