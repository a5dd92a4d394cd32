//! Per-type component columns.
//!
//! A column is indexed by entity slot. Each occupied slot carries its own
//! `RwLock`, so workers touching different entities never contend and a
//! misdeclared overlap surfaces as a borrow error instead of a data race.

use std::any::Any;

use parking_lot::RwLock;

use crate::{ComponentId, entity::EntityIndex};

/// Type-erased view of a column, used for structural operations.
pub(crate) trait AnyColumn: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn component_id(&self) -> ComponentId;
    fn contains(&self, index: EntityIndex) -> bool;
    fn len(&self) -> usize;
    /// Drop the value stored for `index`, if any.
    fn erase(&mut self, index: EntityIndex) -> bool;
    fn occupied(&self) -> Box<dyn Iterator<Item = EntityIndex> + '_>;
}

pub(crate) struct Column<T> {
    slots: Vec<Option<RwLock<T>>>,
    len: usize,
}

impl<T: Send + Sync + 'static> Column<T> {
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
        }
    }

    /// Store a value, returning the previous one.
    pub(crate) fn insert(&mut self, index: EntityIndex, value: T) -> Option<T> {
        let slot = index as usize;
        if slot >= self.slots.len() {
            self.slots.resize_with(slot + 1, || None);
        }

        let previous = self.slots[slot].replace(RwLock::new(value));
        if previous.is_none() {
            self.len += 1;
        }
        previous.map(RwLock::into_inner)
    }

    pub(crate) fn remove(&mut self, index: EntityIndex) -> Option<T> {
        let value = self.slots.get_mut(index as usize)?.take()?;
        self.len -= 1;
        Some(value.into_inner())
    }

    pub(crate) fn cell(&self, index: EntityIndex) -> Option<&RwLock<T>> {
        self.slots.get(index as usize)?.as_ref()
    }
}

impl<T: Send + Sync + 'static> AnyColumn for Column<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn component_id(&self) -> ComponentId {
        ComponentId::of::<T>()
    }

    fn contains(&self, index: EntityIndex) -> bool {
        self.cell(index).is_some()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn erase(&mut self, index: EntityIndex) -> bool {
        self.remove(index).is_some()
    }

    fn occupied(&self) -> Box<dyn Iterator<Item = EntityIndex> + '_> {
        Box::new(
            self.slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.is_some())
                .map(|(index, _)| index as EntityIndex),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_replace_remove() {
        let mut column = Column::<u32>::new();
        assert_eq!(column.insert(3, 10), None);
        assert_eq!(column.insert(3, 11), Some(10));
        assert_eq!(AnyColumn::len(&column), 1);
        assert!(column.contains(3));
        assert!(!column.contains(0));

        assert_eq!(column.remove(3), Some(11));
        assert_eq!(column.remove(3), None);
        assert_eq!(AnyColumn::len(&column), 0);
    }

    #[test]
    fn test_occupied_is_slot_ordered() {
        let mut column = Column::<&'static str>::new();
        column.insert(5, "e");
        column.insert(1, "a");
        column.insert(3, "c");
        column.erase(3);

        let occupied: Vec<_> = column.occupied().collect();
        assert_eq!(occupied, vec![1, 5]);
    }
}
