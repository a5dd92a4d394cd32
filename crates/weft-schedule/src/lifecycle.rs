//! Frame lifecycle notifications published by the scheduler.
//!
//! Published on the frame thread through the [`EventBus`](weft_event::EventBus)
//! given to [`Scheduler::with_events`](crate::Scheduler::with_events).

use std::{borrow::Cow, time::Duration};

use weft_event::FaultKind;

use crate::plan::SystemId;

/// Before the first stage of a frame runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStarted {
    pub frame: u64,
    pub delta: f32,
}

/// After the last stage of a frame finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCompleted {
    pub report: FrameReport,
}

/// A system returned an error or panicked. Published after its stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemFailed {
    pub frame: u64,
    pub system: SystemId,
    pub name: Cow<'static, str>,
    pub kind: FaultKind,
    pub message: String,
}

/// Summary of one [`Scheduler::update`](crate::Scheduler::update).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    /// Stages executed; in sequential mode every system counts as one.
    pub stages: usize,
    /// Systems invoked, including the ones that failed.
    pub systems_run: usize,
    /// Systems that failed this frame, in the order their failures were
    /// collected.
    pub failed: Vec<SystemId>,
    /// Whether the frame ran on the worker pool.
    pub parallel: bool,
    pub elapsed: Duration,
}

impl FrameReport {
    #[must_use]
    pub fn failures(&self) -> usize {
        self.failed.len()
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
