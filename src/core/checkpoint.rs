//! Checkpoint manager: pause/resume with an explicit reservation policy.
//!
//! A `Retain` pause keeps the reservation so resume never waits. A `Release` pause
//! frees it, and resume has to re-acquire it first; if that fails the task stays
//! PAUSED and is marked as waiting for resume.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::PausePolicy;
use crate::core::admission::AdmissionController;
use crate::core::lifecycle::TaskEvent;
use crate::core::registry::{Applied, Linkage, TaskRegistry};
use crate::core::task::{ContainerRef, ResourceRequirements, TaskDescriptor};
use crate::core::SchedulerError;
use crate::runtime::RuntimeDriver;
use crate::util::clock::now_ms;
use crate::util::serde::TaskId;

/// What was running when a task was paused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Paused task.
    pub task_id: TaskId,
    /// Descriptor at pause time.
    pub descriptor: TaskDescriptor,
    /// Container that was frozen.
    pub container: ContainerRef,
    /// Pause time, milliseconds since epoch.
    pub paused_at_ms: u128,
    /// Whether the reservation was given back on pause.
    pub reservation_released: bool,
    /// Resume requested but capacity was unavailable.
    #[serde(default)]
    pub resume_pending: bool,
    /// Resume time, once resumed.
    #[serde(default)]
    pub resumed_at_ms: Option<u128>,
}

/// Result of a successful pause.
#[derive(Debug, Clone)]
pub struct PauseOutcome {
    /// Applied RUNNING -> PAUSED transition.
    pub applied: Applied,
    /// Reservation freed by a `Release` pause.
    pub released: Option<ResourceRequirements>,
}

/// Result of a resume attempt that did not fail.
#[derive(Debug, Clone)]
pub enum ResumeAttempt {
    /// Container thawed, task RUNNING.
    Resumed(Applied),
    /// Capacity unavailable; task stays PAUSED and waits. Carries the shortfall.
    Queued(String),
}

/// Checkpoint history per task, kept until the task is deleted.
#[derive(Debug, Default)]
pub struct CheckpointManager {
    records: Mutex<HashMap<TaskId, Vec<CheckpointRecord>>>,
}

impl CheckpointManager {
    /// Empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Freeze a RUNNING task.
    ///
    /// A failing driver call leaves the task RUNNING with its reservation untouched.
    pub async fn pause(
        &self,
        registry: &TaskRegistry,
        admission: &AdmissionController,
        driver: &dyn RuntimeDriver,
        task_id: TaskId,
        policy: PausePolicy,
    ) -> Result<PauseOutcome, SchedulerError> {
        let task = registry.check(task_id, TaskEvent::PauseRequested)?;
        let container = task.container.clone().ok_or_else(|| {
            SchedulerError::Backend(format!("running task {task_id} has no container"))
        })?;

        driver.pause(&container).await?;

        let applied = registry.apply(task_id, TaskEvent::PauseRequested, Linkage::Keep)?;
        let released = match policy {
            PausePolicy::Retain => None,
            PausePolicy::Release => admission.release(task_id),
        };
        self.records
            .lock()
            .entry(task_id)
            .or_default()
            .push(CheckpointRecord {
                task_id,
                descriptor: task.descriptor,
                container,
                paused_at_ms: now_ms(),
                reservation_released: released.is_some(),
                resume_pending: false,
                resumed_at_ms: None,
            });
        Ok(PauseOutcome { applied, released })
    }

    /// Thaw a PAUSED task, re-acquiring its reservation first when it was released.
    ///
    /// On driver failure any reservation taken by this call is given back and the task
    /// stays PAUSED.
    pub async fn resume(
        &self,
        registry: &TaskRegistry,
        admission: &AdmissionController,
        driver: &dyn RuntimeDriver,
        task_id: TaskId,
    ) -> Result<ResumeAttempt, SchedulerError> {
        let task = registry.check(task_id, TaskEvent::ResumeRequested)?;
        let container = task.container.clone().ok_or_else(|| {
            SchedulerError::Backend(format!("paused task {task_id} has no container"))
        })?;

        let mut reserved_now = false;
        if admission.reservation(task_id).is_none() {
            if !admission.reserve(task_id, &task.descriptor.resources) {
                let reason = admission.capacity_error(&task.descriptor.resources).to_string();
                self.set_resume_pending(task_id, true);
                return Ok(ResumeAttempt::Queued(reason));
            }
            reserved_now = true;
        }

        if let Err(err) = driver.unpause(&container).await {
            if reserved_now {
                admission.release(task_id);
            }
            return Err(err.into());
        }

        match registry.apply(task_id, TaskEvent::ResumeRequested, Linkage::Keep) {
            Ok(applied) => {
                if let Some(latest) = self.records.lock().get_mut(&task_id).and_then(|r| r.last_mut()) {
                    latest.resume_pending = false;
                    latest.resumed_at_ms = Some(now_ms());
                }
                Ok(ResumeAttempt::Resumed(applied))
            }
            Err(err) => {
                if reserved_now {
                    admission.release(task_id);
                }
                Err(err)
            }
        }
    }

    /// Most recent checkpoint of a task.
    pub fn latest(&self, task_id: TaskId) -> Option<CheckpointRecord> {
        self.records.lock().get(&task_id).and_then(|r| r.last().cloned())
    }

    /// Full checkpoint history of a task, oldest first.
    pub fn history(&self, task_id: TaskId) -> Vec<CheckpointRecord> {
        self.records.lock().get(&task_id).cloned().unwrap_or_default()
    }

    /// Whether a resume is waiting for capacity.
    pub fn resume_pending(&self, task_id: TaskId) -> bool {
        self.latest(task_id).is_some_and(|r| r.resume_pending)
    }

    /// Whether the latest pause gave the reservation back.
    pub fn reservation_released(&self, task_id: TaskId) -> bool {
        self.latest(task_id).is_some_and(|r| r.reservation_released && r.resumed_at_ms.is_none())
    }

    /// Mark or clear the waiting-for-resume flag on the latest checkpoint.
    pub fn set_resume_pending(&self, task_id: TaskId, pending: bool) {
        if let Some(latest) = self.records.lock().get_mut(&task_id).and_then(|r| r.last_mut()) {
            latest.resume_pending = pending;
        }
    }

    /// Drop the history of a deleted task.
    pub fn forget(&self, task_id: TaskId) {
        self.records.lock().remove(&task_id);
    }

    /// Every record, grouped by task.
    pub fn all(&self) -> Vec<CheckpointRecord> {
        self.records.lock().values().flatten().cloned().collect()
    }

    /// Replace contents with restored records, preserving per-task order.
    pub fn restore(&self, records: impl IntoIterator<Item = CheckpointRecord>) {
        let mut map = self.records.lock();
        map.clear();
        for record in records {
            map.entry(record.task_id).or_default().push(record);
        }
        for history in map.values_mut() {
            history.sort_by_key(|r| r.paused_at_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lifecycle::TaskState;
    use crate::core::resource_pool::ResourcePool;
    use crate::runtime::{ContainerSpec, DriverError, DriverOp, SimulatedDriver};
    use crate::util::serde::ResourceKind;

    struct Fixture {
        registry: TaskRegistry,
        admission: AdmissionController,
        driver: SimulatedDriver,
        checkpoints: CheckpointManager,
    }

    async fn running_task(cpu: u64) -> (Fixture, TaskId) {
        let fx = Fixture {
            registry: TaskRegistry::new(),
            admission: AdmissionController::new(ResourcePool::new([(ResourceKind::Cpu, cpu)])),
            driver: SimulatedDriver::new(),
            checkpoints: CheckpointManager::new(),
        };
        let descriptor = TaskDescriptor::new("job", "alpine")
            .with_resources(ResourceRequirements::new().with_cpu_shares(cpu));
        let task = fx.registry.insert(descriptor.clone());
        assert!(fx.admission.reserve(task.id, &descriptor.resources));
        fx.registry.apply(task.id, TaskEvent::Admitted, Linkage::Keep).unwrap();

        fx.driver.ensure_image("alpine").await.unwrap();
        let container = fx
            .driver
            .create_container(&ContainerSpec {
                name: "task_job".into(),
                image: "alpine".into(),
                command: vec![],
                resources: descriptor.resources,
            })
            .await
            .unwrap();
        fx.driver.start(&container).await.unwrap();
        fx.registry
            .apply(task.id, TaskEvent::Started, Linkage::Set(container))
            .unwrap();
        (fx, task.id)
    }

    #[tokio::test]
    async fn test_retain_pause_resume_keeps_reservation() {
        let (fx, id) = running_task(4).await;
        let before = fx.registry.get(id).unwrap().container;

        let outcome = fx
            .checkpoints
            .pause(&fx.registry, &fx.admission, &fx.driver, id, PausePolicy::Retain)
            .await
            .unwrap();
        assert!(outcome.released.is_none());
        assert!(fx.admission.reservation(id).is_some());

        let attempt = fx
            .checkpoints
            .resume(&fx.registry, &fx.admission, &fx.driver, id)
            .await
            .unwrap();
        assert!(matches!(attempt, ResumeAttempt::Resumed(_)));
        let task = fx.registry.get(id).unwrap();
        assert_eq!(task.state, TaskState::Running);
        assert_eq!(task.container, before);
        assert!(fx.checkpoints.latest(id).unwrap().resumed_at_ms.is_some());
    }

    #[tokio::test]
    async fn test_release_pause_waits_for_capacity() {
        let (fx, id) = running_task(4).await;
        fx.checkpoints
            .pause(&fx.registry, &fx.admission, &fx.driver, id, PausePolicy::Release)
            .await
            .unwrap();
        assert!(fx.admission.reservation(id).is_none());

        let squatter = uuid::Uuid::new_v4();
        assert!(fx
            .admission
            .reserve(squatter, &ResourceRequirements::new().with_cpu_shares(4)));
        let attempt = fx
            .checkpoints
            .resume(&fx.registry, &fx.admission, &fx.driver, id)
            .await
            .unwrap();
        assert!(matches!(attempt, ResumeAttempt::Queued(_)));
        assert!(fx.checkpoints.resume_pending(id));
        assert_eq!(fx.registry.get(id).unwrap().state, TaskState::Paused);

        fx.admission.release(squatter);
        let attempt = fx
            .checkpoints
            .resume(&fx.registry, &fx.admission, &fx.driver, id)
            .await
            .unwrap();
        assert!(matches!(attempt, ResumeAttempt::Resumed(_)));
        assert!(!fx.checkpoints.resume_pending(id));
    }

    #[tokio::test]
    async fn test_failed_unpause_stays_paused_and_gives_back_reservation() {
        let (fx, id) = running_task(4).await;
        fx.checkpoints
            .pause(&fx.registry, &fx.admission, &fx.driver, id, PausePolicy::Release)
            .await
            .unwrap();
        fx.driver
            .fail_next(DriverOp::Unpause, DriverError::Transient("runtime busy".into()));

        let err = fx
            .checkpoints
            .resume(&fx.registry, &fx.admission, &fx.driver, id)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::RuntimeTransient(_)));
        assert_eq!(fx.registry.get(id).unwrap().state, TaskState::Paused);
        assert!(fx.admission.reservation(id).is_none());
    }

    #[tokio::test]
    async fn test_failed_pause_changes_nothing() {
        let (fx, id) = running_task(2).await;
        fx.driver
            .fail_next(DriverOp::Pause, DriverError::Fatal("cgroup freezer missing".into()));
        assert!(fx
            .checkpoints
            .pause(&fx.registry, &fx.admission, &fx.driver, id, PausePolicy::Release)
            .await
            .is_err());
        assert_eq!(fx.registry.get(id).unwrap().state, TaskState::Running);
        assert!(fx.admission.reservation(id).is_some());
        assert!(fx.checkpoints.latest(id).is_none());
    }
}
