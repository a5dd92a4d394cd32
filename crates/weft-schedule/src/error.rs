//! Scheduler error types.

use thiserror::Error;

/// Configuration errors. Failures inside systems never surface here; they
/// are isolated and reported through [`FrameReport`](crate::FrameReport)
/// and the fault log.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Parallel execution was requested before a plan was built, or after
    /// a registration made the plan stale.
    #[error("no execution plan: call rebuild_execution_plan() first")]
    NoExecutionPlan,

    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
