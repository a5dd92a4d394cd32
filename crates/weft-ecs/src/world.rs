//! World - the component store consumed by the scheduling core.
//!
//! Structural changes (spawn, insert, remove, despawn) need `&mut World`.
//! Everything a running system can do goes through `&World`: counting and
//! enumerating query matches, and borrowing individual components through
//! per-slot locks. The scheduler shares one `&World` across its workers.

use std::any::type_name;

use hashbrown::HashMap;
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::{
    EcsError, EcsResult,
    column::{AnyColumn, Column},
    component::{Component, ComponentId, ComponentRegistry, ConcurrentWrite},
    entity::{Entity, EntityAllocator},
    query::{Query, TermAccess},
};

/// Shared borrow of a component.
pub type Ref<'w, T> = RwLockReadGuard<'w, T>;

/// Exclusive borrow of a component.
pub type RefMut<'w, T> = RwLockWriteGuard<'w, T>;

#[derive(Default)]
pub struct World {
    entities: EntityAllocator,
    columns: HashMap<ComponentId, Box<dyn AnyColumn>>,
    components: ComponentRegistry,
}

impl World {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Registration ====================

    pub fn register<T: Component>(&mut self) -> ComponentId {
        self.components.register::<T>()
    }

    /// Register a component type that may be written concurrently.
    pub fn register_concurrent<T: ConcurrentWrite>(&mut self) -> ComponentId {
        self.components.register_concurrent::<T>()
    }

    #[must_use]
    pub const fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    // ==================== Entities ====================

    pub fn spawn_empty(&mut self) -> Entity {
        self.entities.allocate()
    }

    pub fn spawn<T: Component>(&mut self, component: T) -> Entity {
        let entity = self.spawn_empty();
        self.column_mut::<T>().insert(entity.index(), component);
        entity
    }

    /// Despawn an entity, dropping all of its components.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.entities.deallocate(entity) {
            return false;
        }
        for column in self.columns.values_mut() {
            column.erase(entity.index());
        }
        true
    }

    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    #[must_use]
    pub const fn entity_count(&self) -> usize {
        self.entities.alive_count()
    }

    // ==================== Components ====================

    /// Insert or replace a component. Returns the previous value.
    pub fn insert<T: Component>(&mut self, entity: Entity, component: T) -> EcsResult<Option<T>> {
        if !self.is_alive(entity) {
            return Err(EcsError::NoSuchEntity(entity));
        }
        Ok(self.column_mut::<T>().insert(entity.index(), component))
    }

    pub fn remove<T: Component>(&mut self, entity: Entity) -> Option<T> {
        if !self.is_alive(entity) {
            return None;
        }
        self.columns
            .get_mut(&ComponentId::of::<T>())?
            .as_any_mut()
            .downcast_mut::<Column<T>>()?
            .remove(entity.index())
    }

    #[must_use]
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.has_id(entity, ComponentId::of::<T>())
    }

    #[must_use]
    pub fn has_id(&self, entity: Entity, id: ComponentId) -> bool {
        self.is_alive(entity)
            && self
                .columns
                .get(&id)
                .is_some_and(|column| column.contains(entity.index()))
    }

    /// Borrow a component, failing if it is missing or exclusively borrowed.
    pub fn component<T: Component>(&self, entity: Entity) -> EcsResult<Ref<'_, T>> {
        self.cell::<T>(entity)?
            .try_read()
            .ok_or(EcsError::AlreadyBorrowed {
                entity,
                component: type_name::<T>(),
            })
    }

    /// Mutably borrow a component through the shared world.
    pub fn component_mut<T: Component>(&self, entity: Entity) -> EcsResult<RefMut<'_, T>> {
        self.cell::<T>(entity)?
            .try_write()
            .ok_or(EcsError::AlreadyBorrowed {
                entity,
                component: type_name::<T>(),
            })
    }

    /// Borrow a component if present and currently borrowable.
    #[must_use]
    pub fn try_component<T: Component>(&self, entity: Entity) -> Option<Ref<'_, T>> {
        self.component(entity).ok()
    }

    #[must_use]
    pub fn try_component_mut<T: Component>(&self, entity: Entity) -> Option<RefMut<'_, T>> {
        self.component_mut(entity).ok()
    }

    /// Borrow helper bundling the world with one entity handle.
    #[must_use]
    pub const fn entity(&self, entity: Entity) -> EntityRef<'_> {
        EntityRef {
            world: self,
            entity,
        }
    }

    // ==================== Queries ====================

    /// Number of live entities matching `query`.
    #[must_use]
    pub fn count_matching(&self, query: &Query) -> usize {
        let mut count = 0;
        self.for_each(query, |_| count += 1);
        count
    }

    /// Visit every matching entity in slot order.
    ///
    /// Enumeration is single-threaded; callers that want parallelism
    /// collect handles first and fan out over them.
    pub fn for_each(&self, query: &Query, mut visitor: impl FnMut(Entity)) {
        let mut required: Vec<&dyn AnyColumn> = Vec::new();
        for term in query.terms() {
            if !term.access.is_required() {
                continue;
            }
            match self.columns.get(&term.component) {
                Some(column) => required.push(&**column),
                // A required component nobody stores matches nothing.
                None => return,
            }
        }
        let mut excluded: Vec<&dyn AnyColumn> = Vec::new();
        for term in query.terms() {
            if term.access == TermAccess::Without {
                if let Some(column) = self.columns.get(&term.component) {
                    excluded.push(&**column);
                }
            }
        }

        let accepts = |index| {
            required.iter().all(|column| column.contains(index))
                && !excluded.iter().any(|column| column.contains(index))
        };

        // Drive the walk from the sparsest required column.
        match required.iter().min_by_key(|column| column.len()) {
            Some(driver) => {
                for index in driver.occupied() {
                    if accepts(index) {
                        if let Some(entity) = self.entities.entity_at(index) {
                            visitor(entity);
                        }
                    }
                }
            }
            None => {
                for entity in self.entities.iter_alive() {
                    if accepts(entity.index()) {
                        visitor(entity);
                    }
                }
            }
        }
    }

    fn cell<T: Component>(&self, entity: Entity) -> EcsResult<&parking_lot::RwLock<T>> {
        if !self.is_alive(entity) {
            return Err(EcsError::NoSuchEntity(entity));
        }
        self.columns
            .get(&ComponentId::of::<T>())
            .and_then(|column| column.as_any().downcast_ref::<Column<T>>())
            .and_then(|column| column.cell(entity.index()))
            .ok_or(EcsError::MissingComponent {
                entity,
                component: type_name::<T>(),
            })
    }

    fn column_mut<T: Component>(&mut self) -> &mut Column<T> {
        self.components.register::<T>();
        self.columns
            .entry(ComponentId::of::<T>())
            .or_insert_with(|| Box::new(Column::<T>::new()))
            .as_any_mut()
            .downcast_mut::<Column<T>>()
            .unwrap_or_else(|| unreachable!("column keyed by its own component id"))
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.entities.alive_count())
            .field("columns", &self.columns.len())
            .field("components", &self.components.len())
            .finish()
    }
}

/// An entity handle paired with the world it lives in.
#[derive(Clone, Copy)]
pub struct EntityRef<'w> {
    world: &'w World,
    entity: Entity,
}

impl<'w> EntityRef<'w> {
    #[must_use]
    pub const fn id(&self) -> Entity {
        self.entity
    }

    #[must_use]
    pub const fn world(&self) -> &'w World {
        self.world
    }

    #[must_use]
    pub fn has<T: Component>(&self) -> bool {
        self.world.has::<T>(self.entity)
    }

    pub fn get<T: Component>(&self) -> EcsResult<Ref<'w, T>> {
        self.world.component(self.entity)
    }

    pub fn get_mut<T: Component>(&self) -> EcsResult<RefMut<'w, T>> {
        self.world.component_mut(self.entity)
    }

    #[must_use]
    pub fn try_get<T: Component>(&self) -> Option<Ref<'w, T>> {
        self.world.try_component(self.entity)
    }

    #[must_use]
    pub fn try_get_mut<T: Component>(&self) -> Option<RefMut<'w, T>> {
        self.world.try_component_mut(self.entity)
    }
}

impl std::fmt::Debug for EntityRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EntityRef").field(&self.entity).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Velocity {
        x: f32,
        y: f32,
    }

    struct Frozen;

    fn populated() -> (World, Vec<Entity>) {
        let mut world = World::new();
        let mut entities = Vec::new();
        for i in 0..6 {
            let e = world.spawn(Position {
                x: i as f32,
                y: 0.0,
            });
            if i % 2 == 0 {
                world.insert(e, Velocity { x: 1.0, y: 0.0 }).unwrap();
            }
            entities.push(e);
        }
        world.insert(entities[4], Frozen).unwrap();
        (world, entities)
    }

    #[test]
    fn test_count_and_enumerate_agree() {
        let (world, entities) = populated();
        let query = Query::new().read::<Position>().write::<Velocity>().without::<Frozen>();

        let mut seen = Vec::new();
        world.for_each(&query, |e| seen.push(e));

        assert_eq!(world.count_matching(&query), 2);
        assert_eq!(seen, vec![entities[0], entities[2]]);
    }

    #[test]
    fn test_unknown_required_component_matches_nothing() {
        let (world, _) = populated();
        assert_eq!(world.count_matching(&Query::new().with::<String>()), 0);
    }

    #[test]
    fn test_unconstrained_query_visits_all_live_entities() {
        let (mut world, entities) = populated();
        world.despawn(entities[1]);
        assert_eq!(world.count_matching(&Query::new()), 5);
        assert_eq!(world.count_matching(&Query::new().without::<Frozen>()), 4);
    }

    #[test]
    fn test_component_borrows() {
        let (world, entities) = populated();
        let e = entities[0];

        world.component_mut::<Velocity>(e).unwrap().x = 5.0;
        assert_eq!(world.component::<Velocity>(e).unwrap().x, 5.0);

        assert!(matches!(
            world.component::<Velocity>(entities[1]),
            Err(EcsError::MissingComponent { .. })
        ));
        assert!(world.try_component::<Velocity>(entities[1]).is_none());
    }

    #[test]
    fn test_aliasing_write_is_reported() {
        let (world, entities) = populated();
        let e = entities[0];

        let _guard = world.component_mut::<Position>(e).unwrap();
        assert!(matches!(
            world.component::<Position>(e),
            Err(EcsError::AlreadyBorrowed { .. })
        ));
    }

    #[test]
    fn test_despawn_drops_components_and_invalidates_handle() {
        let (mut world, entities) = populated();
        let e = entities[0];
        assert!(world.despawn(e));
        assert!(!world.despawn(e));
        assert!(matches!(
            world.component::<Position>(e),
            Err(EcsError::NoSuchEntity(_))
        ));

        // Recycled slot must not inherit the old components.
        let fresh = world.spawn_empty();
        assert_eq!(fresh.index(), e.index());
        assert!(!world.has::<Position>(fresh));
    }

    #[test]
    fn test_entity_ref_accessors() {
        let (world, entities) = populated();
        let entity = world.entity(entities[2]);
        assert!(entity.has::<Velocity>());
        entity.get_mut::<Position>().unwrap().y = 3.0;
        assert_eq!(entity.get::<Position>().unwrap().y, 3.0);
        assert!(entity.try_get::<Frozen>().is_none());
    }

    #[test]
    fn test_insert_on_dead_entity_fails() {
        let mut world = World::new();
        let e = world.spawn_empty();
        world.despawn(e);
        assert_eq!(
            world.insert(e, Frozen).map(|_| ()),
            Err(EcsError::NoSuchEntity(e))
        );
    }
}
