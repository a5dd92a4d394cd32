//! Stage planning.
//!
//! Systems are sorted by priority (ascending, registration order breaks
//! ties) and then placed greedily: each system joins the earliest stage
//! none of whose members it conflicts with, or opens a new stage. Systems
//! that do not allow parallel execution always get a stage of their own,
//! and such a stage never takes later members.
//!
//! ```text
//! S1 (w Position)               ┐
//! S2 (w Velocity)               ┴─ stage 0
//! S3 (r Position, w Velocity)   ── stage 1
//! ```
//!
//! The result is deterministic but not minimal.

use std::{borrow::Cow, fmt};

use smallvec::SmallVec;

use crate::{access::SystemAccess, conflict::conflicts_with};

/// Dense registration index of a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemId(pub(crate) u32);

impl SystemId {
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or(u32::MAX))
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the planner knows about a registered system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemDescriptor {
    pub id: SystemId,
    pub name: Cow<'static, str>,
    /// `None` when the system never declared its access.
    pub access: Option<SystemAccess>,
}

impl SystemDescriptor {
    #[must_use]
    pub fn new(id: SystemId, name: impl Into<Cow<'static, str>>, access: Option<SystemAccess>) -> Self {
        Self {
            id,
            name: name.into(),
            access,
        }
    }

    /// Declared priority, or normal priority when undeclared.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.access
            .as_ref()
            .map_or(crate::access::priority::NORMAL, SystemAccess::priority)
    }

    #[must_use]
    pub const fn is_declared(&self) -> bool {
        self.access.is_some()
    }
}

/// How systems without an access declaration are planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UndeclaredAccess {
    /// Treated as touching nothing; shares stages freely.
    #[default]
    Permissive,
    /// Treated as touching everything; always runs alone.
    Exclusive,
}

/// Systems that may run together. Members never conflict pairwise.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionStage {
    members: SmallVec<[SystemId; 8]>,
    exclusive: bool,
}

impl ExecutionStage {
    #[must_use]
    pub fn members(&self) -> &[SystemId] {
        &self.members
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether this stage was opened for a system that must run alone.
    #[must_use]
    pub const fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    #[must_use]
    pub fn contains(&self, id: SystemId) -> bool {
        self.members.contains(&id)
    }
}

/// Ordered stages for one frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionPlan {
    stages: Vec<ExecutionStage>,
}

impl ExecutionPlan {
    #[must_use]
    pub fn stages(&self) -> &[ExecutionStage] {
        &self.stages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    #[must_use]
    pub fn system_count(&self) -> usize {
        self.stages.iter().map(ExecutionStage::len).sum()
    }

    /// Size of the widest stage.
    #[must_use]
    pub fn max_parallelism(&self) -> usize {
        self.stages.iter().map(ExecutionStage::len).max().unwrap_or(0)
    }

    /// Index of the stage containing `id`.
    #[must_use]
    pub fn stage_of(&self, id: SystemId) -> Option<usize> {
        self.stages.iter().position(|stage| stage.contains(id))
    }

    /// Stage members as plain ids, for comparisons and logs.
    #[must_use]
    pub fn to_ids(&self) -> Vec<Vec<SystemId>> {
        self.stages
            .iter()
            .map(|stage| stage.members.to_vec())
            .collect()
    }

    /// Render the plan with system names instead of ids.
    #[must_use]
    pub fn display_with<'a>(&'a self, descriptors: &'a [SystemDescriptor]) -> impl fmt::Display + 'a {
        PlanDisplay {
            plan: self,
            descriptors,
        }
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_with(&[]))
    }
}

struct PlanDisplay<'a> {
    plan: &'a ExecutionPlan,
    descriptors: &'a [SystemDescriptor],
}

impl fmt::Display for PlanDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.plan.is_empty() {
            return f.write_str("<empty plan>");
        }
        for (index, stage) in self.plan.stages.iter().enumerate() {
            if index > 0 {
                f.write_str(" -> ")?;
            }
            f.write_str(if stage.exclusive { "![" } else { "[" })?;
            for (position, id) in stage.members.iter().enumerate() {
                if position > 0 {
                    f.write_str(", ")?;
                }
                match self.descriptors.get(id.index()) {
                    Some(descriptor) if descriptor.id == *id => f.write_str(&descriptor.name)?,
                    _ => write!(f, "{id}")?,
                }
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

/// Builds [`ExecutionPlan`]s from descriptors.
#[derive(Debug, Clone, Copy, Default)]
pub struct StagePlanner {
    undeclared: UndeclaredAccess,
}

static UNDECLARED: SystemAccess = SystemAccess::new();

impl StagePlanner {
    #[must_use]
    pub const fn new(undeclared: UndeclaredAccess) -> Self {
        Self { undeclared }
    }

    #[must_use]
    pub const fn undeclared_access(&self) -> UndeclaredAccess {
        self.undeclared
    }

    fn runs_alone(&self, descriptor: &SystemDescriptor) -> bool {
        match &descriptor.access {
            Some(access) => !access.allows_parallel(),
            None => self.undeclared == UndeclaredAccess::Exclusive,
        }
    }

    /// Compute stages for `descriptors`. Pure; the input order only
    /// matters through the ids it carries.
    #[must_use]
    pub fn plan(&self, descriptors: &[SystemDescriptor]) -> ExecutionPlan {
        let mut order: Vec<&SystemDescriptor> = descriptors.iter().collect();
        order.sort_by_key(|descriptor| (descriptor.priority(), descriptor.id));

        let mut stages: Vec<ExecutionStage> = Vec::new();
        // Accesses of each stage's members, parallel to `stages`.
        let mut stage_access: Vec<Vec<&SystemAccess>> = Vec::new();

        for descriptor in order {
            let access = descriptor.access.as_ref().unwrap_or(&UNDECLARED);

            if self.runs_alone(descriptor) {
                stages.push(ExecutionStage {
                    members: SmallVec::from_elem(descriptor.id, 1),
                    exclusive: true,
                });
                stage_access.push(vec![access]);
                continue;
            }

            let slot = stages.iter().zip(&stage_access).position(|(stage, members)| {
                !stage.exclusive && members.iter().all(|other| !conflicts_with(access, other))
            });

            match slot {
                Some(index) => {
                    stages[index].members.push(descriptor.id);
                    stage_access[index].push(access);
                }
                None => {
                    stages.push(ExecutionStage {
                        members: SmallVec::from_elem(descriptor.id, 1),
                        exclusive: false,
                    });
                    stage_access.push(vec![access]);
                }
            }
        }

        ExecutionPlan { stages }
    }
}

/// Plan with the default [`UndeclaredAccess::Permissive`] policy.
#[must_use]
pub fn compute_execution_stages(descriptors: &[SystemDescriptor]) -> ExecutionPlan {
    StagePlanner::default().plan(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::priority;

    struct Position;
    struct Velocity;
    struct Health;

    fn declared(index: usize, name: &'static str, access: SystemAccess) -> SystemDescriptor {
        SystemDescriptor::new(SystemId::from_index(index), name, Some(access))
    }

    fn id(index: u32) -> SystemId {
        SystemId(index)
    }

    #[test]
    fn test_empty_input_gives_empty_plan() {
        let plan = compute_execution_stages(&[]);
        assert!(plan.is_empty());
        assert_eq!(plan.system_count(), 0);
        assert_eq!(plan.max_parallelism(), 0);
        assert_eq!(plan.to_string(), "<empty plan>");
    }

    #[test]
    fn test_classic_three_system_split() {
        let descriptors = [
            declared(0, "s1", SystemAccess::new().write::<Position>()),
            declared(1, "s2", SystemAccess::new().write::<Velocity>()),
            declared(
                2,
                "s3",
                SystemAccess::new().read::<Position>().write::<Velocity>(),
            ),
        ];
        let plan = compute_execution_stages(&descriptors);

        assert_eq!(plan.to_ids(), vec![vec![id(0), id(1)], vec![id(2)]]);
        assert_eq!(plan.max_parallelism(), 2);
        assert_eq!(plan.stage_of(id(2)), Some(1));
        assert_eq!(plan.display_with(&descriptors).to_string(), "[s1, s2] -> [s3]");
    }

    #[test]
    fn test_readers_share_a_stage() {
        let descriptors: Vec<_> = (0..5)
            .map(|i| declared(i, "reader", SystemAccess::new().read::<Position>()))
            .collect();
        let plan = compute_execution_stages(&descriptors);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.system_count(), 5);
    }

    #[test]
    fn test_priority_orders_stages() {
        let descriptors = [
            declared(
                0,
                "late",
                SystemAccess::new().write::<Health>().with_priority(priority::LATE),
            ),
            declared(
                1,
                "early",
                SystemAccess::new().write::<Health>().with_priority(priority::EARLY),
            ),
        ];
        let plan = compute_execution_stages(&descriptors);
        assert_eq!(plan.to_ids(), vec![vec![id(1)], vec![id(0)]]);
    }

    #[test]
    fn test_exclusive_systems_stand_alone() {
        let descriptors = [
            declared(0, "a", SystemAccess::new().read::<Position>()),
            declared(1, "solo", SystemAccess::new().exclusive()),
            declared(2, "b", SystemAccess::new().read::<Velocity>()),
            declared(3, "c", SystemAccess::new().write::<Position>()),
        ];
        let plan = compute_execution_stages(&descriptors);

        // "b" joins stage 0; "c" conflicts with "a" and cannot enter the
        // exclusive stage, so it opens a third one.
        assert_eq!(
            plan.to_ids(),
            vec![vec![id(0), id(2)], vec![id(1)], vec![id(3)]]
        );
        assert!(plan.stages()[1].is_exclusive());
        assert_eq!(plan.to_string(), "[#0, #2] -> ![#1] -> [#3]");
    }

    #[test]
    fn test_undeclared_policy() {
        let descriptors = [
            declared(0, "writer", SystemAccess::new().write::<Position>()),
            SystemDescriptor::new(id(1), "legacy", None),
        ];

        let permissive = StagePlanner::new(UndeclaredAccess::Permissive).plan(&descriptors);
        assert_eq!(permissive.to_ids(), vec![vec![id(0), id(1)]]);

        let exclusive = StagePlanner::new(UndeclaredAccess::Exclusive).plan(&descriptors);
        assert_eq!(exclusive.to_ids(), vec![vec![id(0)], vec![id(1)]]);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let a = declared(0, "a", SystemAccess::new().write::<Position>());
        let b = declared(1, "b", SystemAccess::new().read::<Position>());
        let c = declared(2, "c", SystemAccess::new().write::<Velocity>());

        let forward = compute_execution_stages(&[a.clone(), b.clone(), c.clone()]);
        let reversed = compute_execution_stages(&[c, b, a]);
        assert_eq!(forward, reversed);
    }
}
