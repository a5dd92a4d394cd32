//! Runtime query descriptions.
//!
//! A [`Query`] is a list of terms built by method chaining. It carries no
//! borrow of the world, so systems can build one up front, reuse it every
//! frame and derive their declared access from it.
//!
//! ```ignore
//! let query = Query::new()
//!     .read::<Position>()
//!     .write::<Velocity>()
//!     .without::<Frozen>();
//!
//! let moving = world.count_matching(&query);
//! ```

use crate::component::{Component, ComponentId};

/// How a term constrains and accesses its component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TermAccess {
    /// Required, read by the iterating code.
    Read,
    /// Required, written by the iterating code.
    Write,
    /// Required, never touched.
    With,
    /// Excluded.
    Without,
}

impl TermAccess {
    /// Whether matching entities must carry the component.
    #[must_use]
    pub const fn is_required(self) -> bool {
        !matches!(self, Self::Without)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryTerm {
    pub component: ComponentId,
    pub access: TermAccess,
}

/// An entity filter over component presence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    terms: Vec<QueryTerm>,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn read<T: Component>(self) -> Self {
        self.term(ComponentId::of::<T>(), TermAccess::Read)
    }

    #[must_use]
    pub fn write<T: Component>(self) -> Self {
        self.term(ComponentId::of::<T>(), TermAccess::Write)
    }

    #[must_use]
    pub fn with<T: Component>(self) -> Self {
        self.term(ComponentId::of::<T>(), TermAccess::With)
    }

    #[must_use]
    pub fn without<T: Component>(self) -> Self {
        self.term(ComponentId::of::<T>(), TermAccess::Without)
    }

    /// Add a raw term.
    #[must_use]
    pub fn term(mut self, component: ComponentId, access: TermAccess) -> Self {
        self.terms.push(QueryTerm { component, access });
        self
    }

    #[must_use]
    pub fn terms(&self) -> &[QueryTerm] {
        &self.terms
    }

    pub fn required(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.terms
            .iter()
            .filter(|term| term.access.is_required())
            .map(|term| term.component)
    }

    pub fn excluded(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.terms
            .iter()
            .filter(|term| term.access == TermAccess::Without)
            .map(|term| term.component)
    }

    /// Components read (and not also written) by this query.
    pub fn reads(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.terms
            .iter()
            .filter(|term| term.access == TermAccess::Read)
            .map(|term| term.component)
    }

    pub fn writes(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.terms
            .iter()
            .filter(|term| term.access == TermAccess::Write)
            .map(|term| term.component)
    }

    /// A query with no required terms matches every live entity.
    #[must_use]
    pub fn is_unconstrained(&self) -> bool {
        self.required().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position;
    struct Velocity;
    struct Frozen;
    struct Player;

    #[test]
    fn test_terms_are_split_by_access() {
        let query = Query::new()
            .read::<Position>()
            .write::<Velocity>()
            .with::<Player>()
            .without::<Frozen>();

        assert_eq!(query.terms().len(), 4);
        assert_eq!(query.reads().collect::<Vec<_>>(), vec![ComponentId::of::<Position>()]);
        assert_eq!(query.writes().collect::<Vec<_>>(), vec![ComponentId::of::<Velocity>()]);
        assert_eq!(query.required().count(), 3);
        assert_eq!(query.excluded().collect::<Vec<_>>(), vec![ComponentId::of::<Frozen>()]);
    }

    #[test]
    fn test_empty_query_is_unconstrained() {
        assert!(Query::new().is_unconstrained());
        assert!(Query::new().without::<Frozen>().is_unconstrained());
        assert!(!Query::new().with::<Player>().is_unconstrained());
    }
}
