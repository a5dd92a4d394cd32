//! Entity handles with generational indices.
//!
//! A handle stays valid until its entity is despawned; after that the slot
//! may be recycled with a bumped generation so stale handles never alias a
//! new entity.

use std::fmt;

/// Generation counter for a recycled slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Generation(u32);

impl Generation {
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen{}", self.0)
    }
}

/// Raw slot index.
pub type EntityIndex = u32;

/// Handle to an entity in a [`World`](crate::World).
///
/// Handles are `Copy` and cheap to pass across worker threads; the
/// parallel query executor fills its buffers with them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    index: EntityIndex,
    generation: Generation,
}

impl Entity {
    #[must_use]
    pub const fn new(index: EntityIndex, generation: Generation) -> Self {
        Self { index, generation }
    }

    /// Slot index, used to address component columns.
    #[must_use]
    pub const fn index(self) -> EntityIndex {
        self.index
    }

    #[must_use]
    pub const fn generation(self) -> Generation {
        self.generation
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index, self.generation.0)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation.0)
    }
}

/// Slot allocator with a free list and per-slot liveness.
#[derive(Default)]
pub struct EntityAllocator {
    generations: Vec<Generation>,
    alive: Vec<bool>,
    free_list: Vec<EntityIndex>,
    alive_count: usize,
}

impl EntityAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            generations: Vec::new(),
            alive: Vec::new(),
            free_list: Vec::new(),
            alive_count: 0,
        }
    }

    pub fn allocate(&mut self) -> Entity {
        self.alive_count += 1;

        if let Some(index) = self.free_list.pop() {
            let slot = index as usize;
            self.alive[slot] = true;
            return Entity::new(index, self.generations[slot]);
        }

        let index = self.generations.len() as EntityIndex;
        self.generations.push(Generation::new());
        self.alive.push(true);
        Entity::new(index, Generation::new())
    }

    /// Release a slot. Returns `false` for stale or unknown handles.
    pub fn deallocate(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }

        let slot = entity.index() as usize;
        self.generations[slot] = self.generations[slot].next();
        self.alive[slot] = false;
        self.free_list.push(entity.index());
        self.alive_count -= 1;
        true
    }

    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        let slot = entity.index() as usize;
        slot < self.generations.len()
            && self.alive[slot]
            && self.generations[slot] == entity.generation()
    }

    /// Current handle for a live slot.
    #[must_use]
    pub fn entity_at(&self, index: EntityIndex) -> Option<Entity> {
        let slot = index as usize;
        (slot < self.alive.len() && self.alive[slot])
            .then(|| Entity::new(index, self.generations[slot]))
    }

    #[must_use]
    pub const fn alive_count(&self) -> usize {
        self.alive_count
    }

    /// Live entities in slot order.
    pub fn iter_alive(&self) -> impl Iterator<Item = Entity> + '_ {
        self.alive
            .iter()
            .enumerate()
            .filter(|(_, alive)| **alive)
            .map(|(slot, _)| Entity::new(slot as EntityIndex, self.generations[slot]))
    }
}
