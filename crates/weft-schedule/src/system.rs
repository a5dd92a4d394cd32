//! The system interface.

use std::{borrow::Cow, fmt, marker::PhantomData};

use weft_ecs::World;
use weft_event::HandlerOutput;

use crate::access::SystemAccess;

/// A per-frame update routine.
///
/// Systems receive `&World`; component borrows go through the world's
/// per-slot locks. [`access`](Self::access) must cover every component the
/// system touches; it is read once, at registration.
pub trait System: Send {
    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(std::any::type_name::<Self>())
    }

    /// Declared component access, or `None` if the system does not say.
    fn access(&self) -> Option<SystemAccess>;

    fn run(&mut self, world: &World, delta: f32) -> eyre::Result<()>;
}

/// Closure adapter for [`System`].
///
/// ```ignore
/// let gravity = FnSystem::new("gravity", |world: &World, dt: f32| {
///     // ...
/// })
/// .with_access(SystemAccess::new().write::<Velocity>());
/// ```
pub struct FnSystem<F, R> {
    name: Cow<'static, str>,
    access: Option<SystemAccess>,
    func: F,
    _output: PhantomData<fn() -> R>,
}

impl<F, R> FnSystem<F, R>
where
    F: FnMut(&World, f32) -> R + Send,
    R: HandlerOutput,
{
    pub fn new(name: impl Into<Cow<'static, str>>, func: F) -> Self {
        Self {
            name: name.into(),
            access: None,
            func,
            _output: PhantomData,
        }
    }

    #[must_use]
    pub fn with_access(mut self, access: SystemAccess) -> Self {
        self.access = Some(access);
        self
    }
}

impl<F, R> System for FnSystem<F, R>
where
    F: FnMut(&World, f32) -> R + Send,
    R: HandlerOutput,
{
    fn name(&self) -> Cow<'static, str> {
        self.name.clone()
    }

    fn access(&self) -> Option<SystemAccess> {
        self.access.clone()
    }

    fn run(&mut self, world: &World, delta: f32) -> eyre::Result<()> {
        (self.func)(world, delta).into_result()
    }
}

impl<F, R> fmt::Debug for FnSystem<F, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSystem")
            .field("name", &self.name)
            .field("access", &self.access)
            .finish_non_exhaustive()
    }
}
