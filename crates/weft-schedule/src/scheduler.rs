//! Frame loop.
//!
//! # Frame Execution
//!
//! ```text
//! update(world, dt):
//!   ├─ FrameStarted
//!   ├─ plan ready && parallel?
//!   │    yes: for stage in plan
//!   │           1 member  → run inline on the frame thread
//!   │           N members → fan out on the worker pool, barrier
//!   │    no:  every system inline, priority order
//!   ├─ per stage: failures → error log, FaultLog, SystemFailed
//!   └─ FrameCompleted
//! ```

use std::{borrow::Cow, fmt, time::Instant};

use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, error, info, warn};
use weft_ecs::{ComponentRegistry, World};
use weft_event::{EventBus, Failure, FaultLog, FaultOrigin, isolate};

use crate::{
    config::SchedulerConfig,
    conflict::validate_system_thread_safety,
    error::{SchedulerError, SchedulerResult},
    lifecycle::{FrameCompleted, FrameReport, FrameStarted, SystemFailed},
    plan::{ExecutionPlan, ExecutionStage, StagePlanner, SystemDescriptor, SystemId},
    system::System,
};

/// Plan lifecycle.
///
/// `NoPlan → Ready` on rebuild, `Ready → Stale` on registration,
/// `Stale → Ready` on rebuild. Only `Ready` permits parallel frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    NoPlan,
    Ready,
    Stale,
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoPlan => "no plan",
            Self::Ready => "ready",
            Self::Stale => "stale",
        })
    }
}

/// Runs registered systems once per frame.
pub struct Scheduler {
    config: SchedulerConfig,
    planner: StagePlanner,
    systems: Vec<Box<dyn System>>,
    descriptors: Vec<SystemDescriptor>,
    plan: ExecutionPlan,
    state: PlanState,
    parallel: bool,
    pool: ThreadPool,
    faults: FaultLog,
    events: Option<EventBus>,
    frame: u64,
}

impl Scheduler {
    /// Build a scheduler and its worker pool.
    pub fn new(config: SchedulerConfig) -> SchedulerResult<Self> {
        let threads = config.resolved_worker_threads();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("weft-worker-{index}"))
            .build()?;

        info!(
            "Scheduler created with {} worker threads (undeclared access: {:?})",
            threads, config.undeclared_access
        );

        Ok(Self {
            planner: StagePlanner::new(config.undeclared_access),
            faults: FaultLog::new(config.fault_capacity),
            parallel: config.parallel,
            config,
            systems: Vec::new(),
            descriptors: Vec::new(),
            plan: ExecutionPlan::default(),
            state: PlanState::NoPlan,
            pool,
            events: None,
            frame: 0,
        })
    }

    /// Like [`new`](Self::new), publishing lifecycle events on `events`.
    pub fn with_events(config: SchedulerConfig, events: EventBus) -> SchedulerResult<Self> {
        let mut scheduler = Self::new(config)?;
        scheduler.events = Some(events);
        Ok(scheduler)
    }

    // ==================== Registration ====================

    /// Register a system. Its access is read once, here.
    ///
    /// Marks an existing plan stale; call
    /// [`rebuild_execution_plan`](Self::rebuild_execution_plan) before the
    /// next frame to keep running in parallel.
    pub fn register_system(&mut self, system: impl System + 'static) -> SystemId {
        let id = SystemId::from_index(self.systems.len());
        let name = system.name();
        let access = system.access();

        if access.is_none() {
            warn!(
                "System {} registered without an access declaration; planned as {:?}",
                name, self.config.undeclared_access
            );
        }

        debug!("Registered system {} as {}", name, id);
        self.descriptors.push(SystemDescriptor::new(id, name, access));
        self.systems.push(Box::new(system));
        self.mark_stale();
        id
    }

    fn mark_stale(&mut self) {
        if self.state == PlanState::Ready {
            self.state = PlanState::Stale;
        }
    }

    /// Downgrade every system that writes components lacking
    /// concurrent-write support to exclusive execution.
    ///
    /// Returns the systems that were changed; any change makes the plan
    /// stale.
    pub fn enforce_thread_safety(&mut self, registry: &ComponentRegistry) -> Vec<SystemId> {
        let mut changed = Vec::new();
        for descriptor in &mut self.descriptors {
            let Some(access) = descriptor.access.as_mut() else {
                continue;
            };
            let report = validate_system_thread_safety(access, registry);
            if report.apply(&descriptor.name, access) {
                changed.push(descriptor.id);
            }
        }
        if !changed.is_empty() {
            self.mark_stale();
        }
        changed
    }

    // ==================== Planning ====================

    /// Recompute and store the execution plan.
    pub fn rebuild_execution_plan(&mut self) -> &ExecutionPlan {
        self.plan = self.planner.plan(&self.descriptors);
        self.state = PlanState::Ready;
        debug!(
            "Execution plan rebuilt: {} systems in {} stages (max parallelism {}): {}",
            self.plan.system_count(),
            self.plan.len(),
            self.plan.max_parallelism(),
            self.plan.display_with(&self.descriptors)
        );
        &self.plan
    }

    /// Enable or disable parallel frames.
    ///
    /// Enabling requires a ready plan. Disabling always succeeds.
    pub fn set_parallel_execution(&mut self, enabled: bool) -> SchedulerResult<()> {
        if enabled && self.state != PlanState::Ready {
            return Err(SchedulerError::NoExecutionPlan);
        }
        self.parallel = enabled;
        Ok(())
    }

    /// Whether the next frame will use the worker pool.
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        self.parallel && self.state == PlanState::Ready
    }

    // ==================== Frame ====================

    /// Run one frame.
    ///
    /// Never fails: a system that errors or panics is logged, recorded in
    /// [`faults`](Self::faults) and listed in the report, and the frame
    /// continues.
    pub fn update(&mut self, world: &World, delta: f32) -> FrameReport {
        self.frame += 1;
        let start = Instant::now();
        let parallel = self.is_parallel();

        self.publish(&FrameStarted {
            frame: self.frame,
            delta,
        });

        let mut report = FrameReport {
            frame: self.frame,
            parallel,
            ..FrameReport::default()
        };

        if parallel {
            for stage_index in 0..self.plan.len() {
                let failures = self.run_stage(stage_index, world, delta);
                report.stages += 1;
                report.systems_run += self.plan.stages()[stage_index].len();
                self.handle_failures(failures, &mut report);
            }
        } else {
            if self.state != PlanState::Ready && !self.systems.is_empty() {
                debug!(
                    "Frame {} running sequentially (plan {})",
                    self.frame, self.state
                );
            }
            for id in self.sequential_order() {
                let failure = self.run_inline(id, world, delta);
                report.stages += 1;
                report.systems_run += 1;
                self.handle_failures(failure.into_iter().collect(), &mut report);
            }
        }

        report.elapsed = start.elapsed();
        self.publish(&FrameCompleted {
            report: report.clone(),
        });
        report
    }

    /// Priority order, registration order breaking ties.
    fn sequential_order(&self) -> Vec<SystemId> {
        let mut order: Vec<&SystemDescriptor> = self.descriptors.iter().collect();
        order.sort_by_key(|descriptor| (descriptor.priority(), descriptor.id));
        order.into_iter().map(|descriptor| descriptor.id).collect()
    }

    fn run_inline(&mut self, id: SystemId, world: &World, delta: f32) -> Option<(SystemId, Failure)> {
        let system = self.systems.get_mut(id.index())?;
        isolate(|| system.run(world, delta)).err().map(|failure| (id, failure))
    }

    fn run_stage(&mut self, stage_index: usize, world: &World, delta: f32) -> Vec<(SystemId, Failure)> {
        let Some(stage) = self.plan.stages().get(stage_index) else {
            return Vec::new();
        };

        if let [only] = stage.members() {
            let only = *only;
            return self.run_inline(only, world, delta).into_iter().collect();
        }

        run_parallel(&self.pool, stage, &mut self.systems, world, delta)
    }

    fn handle_failures(&self, failures: Vec<(SystemId, Failure)>, report: &mut FrameReport) {
        for (id, failure) in failures {
            let name = self.system_name(id);
            error!("System {} failed in frame {}: {}", name, self.frame, failure);

            self.publish(&SystemFailed {
                frame: self.frame,
                system: id,
                name: name.clone(),
                kind: failure.kind,
                message: failure.message.clone(),
            });
            self.faults
                .record(failure.into_fault(FaultOrigin::System { name }));
            report.failed.push(id);
        }
    }

    fn publish<E: weft_event::Event>(&self, event: &E) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    fn system_name(&self, id: SystemId) -> Cow<'static, str> {
        self.descriptor(id)
            .map_or_else(|| Cow::Owned(id.to_string()), |descriptor| descriptor.name.clone())
    }

    // ==================== Introspection ====================

    #[must_use]
    pub fn descriptors(&self) -> &[SystemDescriptor] {
        &self.descriptors
    }

    #[must_use]
    pub fn descriptor(&self, id: SystemId) -> Option<&SystemDescriptor> {
        self.descriptors.get(id.index())
    }

    /// Current plan, if it is ready.
    #[must_use]
    pub fn plan(&self) -> Option<&ExecutionPlan> {
        (self.state == PlanState::Ready).then_some(&self.plan)
    }

    #[must_use]
    pub const fn plan_state(&self) -> PlanState {
        self.state
    }

    #[must_use]
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    #[must_use]
    pub fn worker_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    #[must_use]
    pub const fn faults(&self) -> &FaultLog {
        &self.faults
    }

    /// Frames run so far.
    #[must_use]
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("systems", &self.descriptors.len())
            .field("state", &self.state)
            .field("parallel", &self.parallel)
            .field("workers", &self.worker_threads())
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}

/// Fan a stage out over the pool and wait for every member.
fn run_parallel(
    pool: &ThreadPool,
    stage: &ExecutionStage,
    systems: &mut [Box<dyn System>],
    world: &World,
    delta: f32,
) -> Vec<(SystemId, Failure)> {
    let failures = Mutex::new(Vec::new());

    pool.scope(|scope| {
        for (index, system) in systems.iter_mut().enumerate() {
            let id = SystemId::from_index(index);
            if !stage.contains(id) {
                continue;
            }
            let failures = &failures;
            scope.spawn(move |_| {
                if let Err(failure) = isolate(|| system.run(world, delta)) {
                    failures.lock().push((id, failure));
                }
            });
        }
    });

    let mut failures = failures.into_inner();
    failures.sort_by_key(|(id, _)| *id);
    failures
}
