//! Admission controller: feasibility checks and preemption planning.
//!
//! The controller is the only owner of the [`ResourcePool`]. Everything else reserves
//! and releases through it.

use crate::core::resource_pool::{DimensionUsage, ResourcePool, Shortfall};
use crate::core::task::{ResourceRequirements, Task};
use crate::core::SchedulerError;
use crate::util::serde::TaskId;

/// Outcome of an admission evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Reservation taken.
    Admitted,
    /// No reservation taken; evicting these running tasks (in order) frees enough.
    Preempt(Vec<TaskId>),
}

/// Decides whether a task may start now, must wait, or must evict lower-priority work.
#[derive(Debug)]
pub struct AdmissionController {
    pool: ResourcePool,
}

impl AdmissionController {
    /// Take ownership of a pool.
    pub const fn new(pool: ResourcePool) -> Self {
        Self { pool }
    }

    /// Reject requirements that name a dimension the pool does not track.
    pub fn supports(&self, req: &ResourceRequirements) -> Result<(), SchedulerError> {
        match req.iter().find(|(kind, _)| !self.pool.has_dimension(*kind)) {
            Some((kind, _)) => Err(SchedulerError::Validation(format!(
                "resource {kind} is not provided by this pool"
            ))),
            None => Ok(()),
        }
    }

    /// Evaluate `task` against the pool.
    ///
    /// `running` lists the tasks that could be evicted; only strictly-lower-priority
    /// ones holding a reservation are considered, and only when `task` may preempt.
    pub fn admit(&self, task: &Task, running: &[Task]) -> Result<AdmissionDecision, SchedulerError> {
        let req = &task.descriptor.resources;
        if self.pool.try_reserve(task.id, req) {
            return Ok(AdmissionDecision::Admitted);
        }
        if task.priority().can_preempt() {
            if let Some(victims) = self.plan_preemption(task, running) {
                tracing::info!(
                    "task {} ({}) can preempt {} task(s)",
                    task.id,
                    task.priority(),
                    victims.len()
                );
                return Ok(AdmissionDecision::Preempt(victims));
            }
        }
        Err(self.capacity_error(req))
    }

    /// Retry the reservation after a preemption released the victims.
    pub fn complete_preemption(&self, task: &Task) -> Result<AdmissionDecision, SchedulerError> {
        if self.pool.try_reserve(task.id, &task.descriptor.resources) {
            Ok(AdmissionDecision::Admitted)
        } else {
            Err(self.capacity_error(&task.descriptor.resources))
        }
    }

    /// Smallest victim set, chosen by ascending priority then oldest first, whose
    /// reservations together with free capacity cover `task`. `None` if even evicting
    /// every candidate is not enough.
    pub fn plan_preemption(&self, task: &Task, running: &[Task]) -> Option<Vec<TaskId>> {
        let req = &task.descriptor.resources;
        let mut candidates: Vec<(&Task, ResourceRequirements)> = running
            .iter()
            .filter(|t| t.id != task.id && t.priority() < task.priority())
            .filter_map(|t| self.pool.reservation(t.id).map(|r| (t, r)))
            .filter(|(_, r)| req.iter().any(|(kind, _)| r.get(kind) > 0))
            .collect();
        candidates.sort_by_key(|(t, _)| (t.priority(), t.created_at_ms, t.seq));

        let mut chosen = Vec::new();
        let mut credit = ResourceRequirements::new();
        for (victim, reserved) in candidates {
            credit.accumulate(&reserved);
            chosen.push((victim.id, reserved));
            if self.pool.shortfall_with_credit(req, &credit).is_none() {
                return Some(self.minimize(req, chosen));
            }
        }
        None
    }

    // Drop victims that turn out to be unnecessary, newest choice first.
    fn minimize(
        &self,
        req: &ResourceRequirements,
        mut chosen: Vec<(TaskId, ResourceRequirements)>,
    ) -> Vec<TaskId> {
        let mut i = chosen.len();
        while i > 0 {
            i -= 1;
            let mut credit = ResourceRequirements::new();
            for (j, (_, reserved)) in chosen.iter().enumerate() {
                if j != i {
                    credit.accumulate(reserved);
                }
            }
            if self.pool.shortfall_with_credit(req, &credit).is_none() {
                chosen.remove(i);
            }
        }
        chosen.into_iter().map(|(id, _)| id).collect()
    }

    /// Reserve without preemption (resume of a released checkpoint, restore).
    pub fn reserve(&self, task_id: TaskId, req: &ResourceRequirements) -> bool {
        self.pool.try_reserve(task_id, req)
    }

    /// Release every reservation of `task_id`.
    pub fn release(&self, task_id: TaskId) -> Option<ResourceRequirements> {
        self.pool.release(task_id)
    }

    /// Reservation held by `task_id`.
    pub fn reservation(&self, task_id: TaskId) -> Option<ResourceRequirements> {
        self.pool.reservation(task_id)
    }

    /// Per-dimension capacity and commitment.
    pub fn usage(&self) -> Vec<DimensionUsage> {
        self.pool.usage()
    }

    /// Whether pool accounting is internally consistent and within capacity.
    pub fn is_consistent(&self) -> bool {
        self.pool.is_consistent()
    }

    /// Capacity error describing why `req` does not fit now.
    pub fn capacity_error(&self, req: &ResourceRequirements) -> SchedulerError {
        match self.pool.shortfall(req) {
            Some(Shortfall {
                kind,
                requested,
                available,
            }) => SchedulerError::Capacity {
                dimension: kind,
                requested,
                available,
            },
            None => SchedulerError::Backend("capacity changed during admission".into()),
        }
    }
}
