//! Storage error types.

use thiserror::Error;

use crate::Entity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcsError {
    /// Handle is stale or was never allocated.
    #[error("entity {0} is not alive")]
    NoSuchEntity(Entity),

    #[error("entity {entity} has no {component} component")]
    MissingComponent {
        entity: Entity,
        component: &'static str,
    },

    /// The slot is locked in a way incompatible with the request. Under a
    /// correct plan this only happens when a system borrows the same
    /// component twice, or when two concurrently scheduled systems
    /// under-declared their access.
    #[error("{component} of entity {entity} is already borrowed")]
    AlreadyBorrowed {
        entity: Entity,
        component: &'static str,
    },
}

pub type EcsResult<T> = Result<T, EcsError>;
