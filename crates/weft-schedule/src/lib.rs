#![allow(clippy::redundant_pub_crate)]
#![allow(clippy::missing_fields_in_debug)]

//! Weft scheduling core.
//!
//! Decides which systems may run at the same time and runs them.
//!
//! # Pipeline
//!
//! ```text
//! register_system(s)  →  SystemDescriptor { reads, writes, priority, allows_parallel }
//!          │
//! rebuild_execution_plan()  →  StagePlanner (greedy, conflict-free stages)
//!          │
//! update(world, dt)  →  stage 0 ─barrier─ stage 1 ─barrier─ ...
//!                        (1 member inline, N members on the worker pool)
//! ```
//!
//! Inside a system, [`ParallelQueryExecutor`] splits a single query across
//! threads.
//!
//! # Failure Policy
//!
//! Configuration mistakes return [`SchedulerError`]. A system that returns
//! an error or panics is isolated: logged, recorded in the scheduler's
//! [`FaultLog`](weft_event::FaultLog), listed in the [`FrameReport`], and
//! the frame goes on.

mod access;
mod config;
mod conflict;
mod error;
mod lifecycle;
mod par_query;
mod plan;
mod scheduler;
mod system;

pub use access::{SystemAccess, priority};
pub use config::{QueryExecutorConfig, SchedulerConfig, available_workers};
pub use conflict::{
    ThreadSafetyReport, conflicting_components, conflicts_with, is_safe_for_concurrent_write,
    validate_system_thread_safety,
};
pub use error::{SchedulerError, SchedulerResult};
pub use lifecycle::{FrameCompleted, FrameReport, FrameStarted, SystemFailed};
pub use par_query::{ParallelQueryExecutor, QueryStats};
pub use plan::{
    ExecutionPlan, ExecutionStage, StagePlanner, SystemDescriptor, SystemId, UndeclaredAccess,
    compute_execution_stages,
};
pub use scheduler::{PlanState, Scheduler};
pub use system::{FnSystem, System};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        FnSystem, ParallelQueryExecutor, Scheduler, SchedulerConfig, System, SystemAccess,
        SystemId,
    };
}
