//! Scheduler and query-executor configuration.

use std::num::NonZeroUsize;

use weft_event::FaultLog;

use crate::plan::UndeclaredAccess;

/// Worker threads to use when none are configured.
#[must_use]
pub fn available_workers() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Run multi-member stages on the worker pool once a plan is ready.
    pub parallel: bool,
    /// Worker pool size; `None` uses the available hardware parallelism.
    pub worker_threads: Option<usize>,
    /// Planning policy for systems without an access declaration.
    pub undeclared_access: UndeclaredAccess,
    /// Faults retained by the scheduler's fault log.
    pub fault_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            worker_threads: None,
            undeclared_access: UndeclaredAccess::default(),
            fault_capacity: FaultLog::DEFAULT_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    /// Sequential execution, for tests and debugging.
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    #[must_use]
    pub const fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    #[must_use]
    pub const fn with_undeclared_access(mut self, policy: UndeclaredAccess) -> Self {
        self.undeclared_access = policy;
        self
    }

    #[must_use]
    pub const fn with_fault_capacity(mut self, capacity: usize) -> Self {
        self.fault_capacity = capacity;
        self
    }

    /// Effective pool size (at least one).
    #[must_use]
    pub fn resolved_worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(available_workers).max(1)
    }
}

#[derive(Debug, Clone)]
pub struct QueryExecutorConfig {
    /// Upper bound on workers; `None` uses the available hardware parallelism.
    pub max_threads: Option<usize>,
    /// Smallest number of entities worth handing to one worker.
    pub min_batch_size: usize,
}

impl Default for QueryExecutorConfig {
    fn default() -> Self {
        Self {
            max_threads: None,
            min_batch_size: 64,
        }
    }
}

impl QueryExecutorConfig {
    #[must_use]
    pub const fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = Some(threads);
        self
    }

    #[must_use]
    pub const fn with_min_batch_size(mut self, size: usize) -> Self {
        self.min_batch_size = size;
        self
    }

    #[must_use]
    pub fn resolved_max_threads(&self) -> usize {
        self.max_threads.unwrap_or_else(available_workers).max(1)
    }
}
