//! Scheduler: management operations plus the control loop.
//!
//! Each task has an async "gate" (a `tokio::sync::Mutex<()>`). Every operation on a
//! task holds its gate for the whole operation, including driver calls, so a task
//! has at most one in-flight driver call and a delete waits for it to settle. The
//! registry, pool and queue locks are `parking_lot` locks held only for bookkeeping
//! and never across an `.await`.
//!
//! ```rust,ignore
//! let driver = Arc::new(SimulatedDriver::new());
//! let scheduler = Scheduler::new(SchedulerConfig::default(), driver)?;
//! let id = scheduler.submit(descriptor)?;
//! scheduler.start(id).await?;
//! scheduler.scheduler_start()?;
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{PausePolicy, SchedulerConfig};
use crate::core::admission::{AdmissionController, AdmissionDecision};
use crate::core::audit::{build_audit_event, AuditSink};
use crate::core::checkpoint::{CheckpointManager, CheckpointRecord, ResumeAttempt};
use crate::core::lifecycle::{TaskEvent, TaskState};
use crate::core::registry::{Applied, Linkage, TaskRegistry};
use crate::core::resource_pool::{DimensionUsage, ResourcePool};
use crate::core::task::{ContainerRef, ResourceRequirements, Task, TaskDescriptor, TaskView};
use crate::core::SchedulerError;
use crate::infra::queue::{InMemoryQueue, QueueEntry};
use crate::infra::store::{StateSnapshot, StateStore};
use crate::runtime::{ContainerSpec, ContainerStatus, DriverError, RuntimeDriver};
use crate::util::clock::now_ms;
use crate::util::serde::{Priority, TaskId};

/// Result of an explicit or loop-driven admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// Reservation taken and the task is RUNNING.
    Admitted,
    /// Not enough capacity; the task stays PENDING in the queue.
    Queued {
        /// Capacity shortfall.
        reason: String,
    },
    /// Admitted after evicting these tasks back to PENDING.
    Preempted(Vec<TaskId>),
    /// A concurrent delete cancelled the task before it reached RUNNING.
    Cancelled,
}

/// Result of a resume request that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// RUNNING again with the same container.
    Resumed,
    /// Capacity unavailable; the task stays PAUSED and rebalance resumes it later.
    Queued {
        /// Capacity shortfall.
        reason: String,
    },
}

/// Operator-controlled state of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Loop is processing the queue.
    Running,
    /// Loop is halted; management operations still work.
    Stopped,
}

/// Changes to a PENDING task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskUpdate {
    /// New priority.
    pub priority: Option<Priority>,
    /// New requirements.
    pub resources: Option<ResourceRequirements>,
}

/// Aggregate view for status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Loop state.
    pub scheduler: SchedulerState,
    /// Tasks waiting for admission or for a resume reservation.
    pub queue_length: usize,
    /// Capacity and commitment per dimension.
    pub resources: Vec<DimensionUsage>,
    /// Task count per state.
    pub tasks_by_state: BTreeMap<TaskState, usize>,
    /// Registered tasks.
    pub total_tasks: usize,
}

/// What one rebalance pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebalanceReport {
    /// Tasks admitted and started, in admission order.
    pub admitted: Vec<TaskId>,
    /// Paused tasks resumed after their reservation came back.
    pub resumed: Vec<TaskId>,
    /// Tasks evicted to make room.
    pub preempted: Vec<TaskId>,
    /// Per-task failures (logged and recorded, never fatal to the pass).
    pub errors: usize,
    /// Queue length after the pass.
    pub still_queued: usize,
}

// How a realization ended when the driver calls succeeded.
enum Realized {
    Started,
    Cancelled,
}

// Victims actually evicted by a preemption attempt, and why it stopped early.
#[derive(Default)]
struct Eviction {
    evicted: Vec<TaskId>,
    failure: Option<String>,
}

struct LoopHandle {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

struct Inner {
    config: SchedulerConfig,
    registry: TaskRegistry,
    admission: AdmissionController,
    checkpoints: CheckpointManager,
    queue: Mutex<InMemoryQueue>,
    driver: Arc<dyn RuntimeDriver>,
    store: Option<Arc<dyn StateStore>>,
    persist_lock: Mutex<()>,
    audit: Mutex<Option<Box<dyn AuditSink>>>,
    gates: Mutex<HashMap<TaskId, Arc<AsyncMutex<()>>>>,
    cancellations: Mutex<HashSet<TaskId>>,
    wake: Notify,
    control: Mutex<Option<LoopHandle>>,
}

/// Explicitly constructed scheduler instance. Clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.inner.registry.len())
            .field("queued", &self.inner.queue.lock().len())
            .field("state", &self.scheduler_state())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// In-memory scheduler without persistence or audit.
    pub fn new(
        config: SchedulerConfig,
        driver: Arc<dyn RuntimeDriver>,
    ) -> Result<Self, SchedulerError> {
        crate::builders::SchedulerBuilder::new(config, driver).build()
    }

    pub(crate) fn from_parts(
        config: SchedulerConfig,
        driver: Arc<dyn RuntimeDriver>,
        store: Option<Arc<dyn StateStore>>,
        audit: Option<Box<dyn AuditSink>>,
    ) -> Self {
        let pool = ResourcePool::new(config.pool.capacities.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                registry: TaskRegistry::new(),
                admission: AdmissionController::new(pool),
                checkpoints: CheckpointManager::new(),
                queue: Mutex::new(InMemoryQueue::new()),
                driver,
                store,
                persist_lock: Mutex::new(()),
                audit: Mutex::new(audit),
                gates: Mutex::new(HashMap::new()),
                cancellations: Mutex::new(HashSet::new()),
                wake: Notify::new(),
                control: Mutex::new(None),
            }),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Validate and register a task as PENDING, queue it, and wake the loop.
    pub fn submit(&self, descriptor: TaskDescriptor) -> Result<TaskId, SchedulerError> {
        descriptor.validate()?;
        self.inner.admission.supports(&descriptor.resources)?;
        let task = self.inner.registry.insert(descriptor);
        self.enqueue(&task);
        tracing::info!(
            "task {} submitted: image={} priority={}",
            task.id,
            task.descriptor.image,
            task.priority()
        );
        self.audit(task.id, "submit", None, Some(TaskState::Pending), None);
        self.persist();
        self.inner.wake.notify_one();
        Ok(task.id)
    }

    /// View of one task.
    pub fn get(&self, task_id: TaskId) -> Result<TaskView, SchedulerError> {
        self.inner.registry.get(task_id).map(|t| t.view())
    }

    /// Views of all tasks in submission order, optionally only those in `state`.
    pub fn list(&self, state: Option<TaskState>) -> Vec<TaskView> {
        self.inner
            .registry
            .list(state)
            .iter()
            .map(Task::view)
            .collect()
    }

    /// Checkpoint history of a task.
    pub fn checkpoints(&self, task_id: TaskId) -> Vec<CheckpointRecord> {
        self.inner.checkpoints.history(task_id)
    }

    /// Explicit admission attempt for a PENDING task.
    pub async fn start(&self, task_id: TaskId) -> Result<AdmissionOutcome, SchedulerError> {
        let gate = self.gate(task_id);
        let _guard = gate.lock().await;
        let task = self.inner.registry.check(task_id, TaskEvent::Admitted)?;
        self.admit_and_realize(task).await
    }

    /// Graceful stop of a RUNNING or PAUSED task; releases its reservation.
    pub async fn stop(&self, task_id: TaskId) -> Result<TaskView, SchedulerError> {
        let gate = self.gate(task_id);
        let _guard = gate.lock().await;
        let applied = self.stop_locked(task_id).await?;
        self.persist();
        self.inner.wake.notify_one();
        Ok(applied.task.view())
    }

    /// Pause with the configured default policy.
    pub async fn pause(&self, task_id: TaskId) -> Result<TaskView, SchedulerError> {
        self.pause_with(task_id, self.inner.config.pause_policy).await
    }

    /// Pause with an explicit reservation policy.
    pub async fn pause_with(
        &self,
        task_id: TaskId,
        policy: PausePolicy,
    ) -> Result<TaskView, SchedulerError> {
        let gate = self.gate(task_id);
        let _guard = gate.lock().await;
        let inner = &self.inner;
        let outcome = inner
            .checkpoints
            .pause(
                &inner.registry,
                &inner.admission,
                inner.driver.as_ref(),
                task_id,
                policy,
            )
            .await?;
        let detail = outcome.released.as_ref().map(|_| "reservation released".to_string());
        self.record(&outcome.applied, TaskEvent::PauseRequested, detail);
        self.persist();
        if outcome.released.is_some() {
            inner.wake.notify_one();
        }
        Ok(outcome.applied.task.view())
    }

    /// Resume a PAUSED task.
    pub async fn resume(&self, task_id: TaskId) -> Result<ResumeOutcome, SchedulerError> {
        let gate = self.gate(task_id);
        let _guard = gate.lock().await;
        let outcome = self.resume_locked(task_id).await?;
        self.persist();
        Ok(outcome)
    }

    /// Remove a task from the registry.
    ///
    /// Legal from PENDING, STOPPED and FAILED. A delete that arrives while the task is
    /// being realized waits for the driver call to settle, then cancels it.
    pub async fn delete(&self, task_id: TaskId) -> Result<(), SchedulerError> {
        let task = self.inner.registry.get(task_id)?;
        if matches!(task.state, TaskState::Pending | TaskState::Scheduled) {
            self.inner.cancellations.lock().insert(task_id);
        }

        let gate = self.gate(task_id);
        let guard = gate.lock().await;
        let result = self.delete_locked(task_id).await;
        self.inner.cancellations.lock().remove(&task_id);
        drop(guard);

        if result.is_ok() {
            self.inner.gates.lock().remove(&task_id);
            self.persist();
            self.inner.wake.notify_one();
        }
        result
    }

    /// Change priority and/or requirements of a PENDING task and rebalance.
    pub async fn update_task(
        &self,
        task_id: TaskId,
        update: TaskUpdate,
    ) -> Result<TaskView, SchedulerError> {
        let gate = self.gate(task_id);
        let _guard = gate.lock().await;
        let task = self.inner.registry.check(task_id, TaskEvent::Reconfigured)?;

        let mut descriptor = task.descriptor;
        if let Some(priority) = update.priority {
            descriptor.priority = priority;
        }
        if let Some(resources) = update.resources {
            descriptor.resources = resources;
        }
        descriptor.validate()?;
        self.inner.admission.supports(&descriptor.resources)?;

        self.inner.registry.set_descriptor(task_id, descriptor)?;
        let applied = self.apply(task_id, TaskEvent::Reconfigured, Linkage::Keep)?;
        self.enqueue(&applied.task);
        self.persist();
        self.inner.wake.notify_one();
        Ok(applied.task.view())
    }

    /// Aggregate pool, queue, loop and task counts.
    pub fn system_status(&self) -> SystemStatus {
        SystemStatus {
            scheduler: self.scheduler_state(),
            queue_length: self.inner.queue.lock().len(),
            resources: self.inner.admission.usage(),
            tasks_by_state: self.inner.registry.count_by_state(),
            total_tasks: self.inner.registry.len(),
        }
    }

    /// Walk the queue in priority order and admit (or resume) whatever fits.
    ///
    /// Tasks whose gate is busy are skipped for this pass. A failure for one task is
    /// logged and counted and the pass continues.
    pub async fn rebalance(&self) -> RebalanceReport {
        let mut report = RebalanceReport::default();
        let ids = self.inner.queue.lock().ordered_ids();
        for task_id in ids {
            let Ok(_guard) = self.gate(task_id).try_lock_owned() else {
                tracing::debug!("rebalance: task {} busy, skipping", task_id);
                continue;
            };
            let Ok(task) = self.inner.registry.get(task_id) else {
                self.inner.queue.lock().remove(task_id);
                continue;
            };

            match task.state {
                TaskState::Pending => match self.admit_and_realize(task).await {
                    Ok(AdmissionOutcome::Admitted) => report.admitted.push(task_id),
                    Ok(AdmissionOutcome::Preempted(victims)) => {
                        report.admitted.push(task_id);
                        report.preempted.extend(victims);
                    }
                    Ok(AdmissionOutcome::Queued { .. } | AdmissionOutcome::Cancelled) => {}
                    Err(err) => {
                        tracing::error!("rebalance: task {} failed: {}", task_id, err);
                        report.errors += 1;
                    }
                },
                TaskState::Paused if self.inner.checkpoints.resume_pending(task_id) => {
                    match self.resume_locked(task_id).await {
                        Ok(ResumeOutcome::Resumed) => report.resumed.push(task_id),
                        Ok(ResumeOutcome::Queued { .. }) => {}
                        Err(err) => {
                            tracing::error!("rebalance: resume of task {} failed: {}", task_id, err);
                            report.errors += 1;
                        }
                    }
                }
                _ => {
                    self.inner.queue.lock().remove(task_id);
                }
            }
        }
        report.still_queued = self.inner.queue.lock().len();
        if !report.admitted.is_empty() || !report.resumed.is_empty() || report.errors > 0 {
            self.persist();
        }
        report
    }

    /// One control-loop iteration: reconcile exits, rebalance, reap old terminal tasks.
    pub async fn run_once(&self) -> RebalanceReport {
        tracing::debug!("scheduler tick");
        self.reconcile_running().await;
        let report = self.rebalance().await;
        self.reap_terminal();
        report
    }

    /// Start the control loop. Starting a running loop is a no-op.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn scheduler_start(&self) -> Result<(), SchedulerError> {
        let mut control = self.inner.control.lock();
        if control.as_ref().is_some_and(|h| !h.join.is_finished()) {
            tracing::debug!("scheduler already running");
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SchedulerError::Backend(format!("no tokio runtime: {e}")))?;
        let (shutdown, rx) = oneshot::channel();
        let this = self.clone();
        let join = runtime.spawn(async move { this.run_loop(rx).await });
        *control = Some(LoopHandle { shutdown, join });
        drop(control);
        tracing::info!("scheduler started");
        Ok(())
    }

    /// Stop the control loop after its current pass. Stopping a stopped loop is a no-op.
    /// RUNNING tasks keep running.
    pub async fn scheduler_stop(&self) {
        let handle = self.inner.control.lock().take();
        let Some(handle) = handle else {
            tracing::debug!("scheduler already stopped");
            return;
        };
        let _ = handle.shutdown.send(());
        if let Err(err) = handle.join.await {
            tracing::error!("scheduler loop ended abnormally: {}", err);
        }
        tracing::info!("scheduler stopped");
    }

    /// Whether the loop is running.
    pub fn scheduler_state(&self) -> SchedulerState {
        match self.inner.control.lock().as_ref() {
            Some(handle) if !handle.join.is_finished() => SchedulerState::Running,
            _ => SchedulerState::Stopped,
        }
    }

    /// Stop the loop, wait for every in-flight task operation, and persist a final
    /// snapshot.
    pub async fn shutdown(&self) {
        self.scheduler_stop().await;
        let gates: Vec<_> = self.inner.gates.lock().values().cloned().collect();
        for gate in gates {
            let _drained = gate.lock().await;
        }
        self.persist();
        tracing::info!("scheduler shut down");
    }

    async fn run_loop(self, mut shutdown: oneshot::Receiver<()>) {
        let mut interval = tokio::time::interval(self.inner.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {}
                () = self.inner.wake.notified() => {}
            }
            let report = self.run_once().await;
            if !report.admitted.is_empty() {
                tracing::debug!(
                    "tick admitted {} task(s), {} still queued",
                    report.admitted.len(),
                    report.still_queued
                );
            }
        }
    }

    /// Check the global invariants; the error names the first violation.
    pub fn check_invariants(&self) -> Result<(), String> {
        if !self.inner.admission.is_consistent() {
            return Err("resource pool is over-committed or inconsistent".into());
        }
        let queue = self.inner.queue.lock();
        for task in self.inner.registry.list(None) {
            if !task.linkage_consistent() {
                return Err(format!(
                    "task {} in state {} has container linkage {:?}",
                    task.id, task.state, task.container
                ));
            }
            let reserved = self.inner.admission.reservation(task.id).is_some();
            let expected = match task.state {
                TaskState::Scheduled | TaskState::Running => Some(true),
                TaskState::Paused => None,
                _ => Some(false),
            };
            if expected.is_some_and(|e| e != reserved) {
                return Err(format!(
                    "task {} in state {} has reservation={}",
                    task.id, task.state, reserved
                ));
            }
            if task.state == TaskState::Pending && !queue.contains(task.id) {
                return Err(format!("pending task {} is not queued", task.id));
            }
        }
        Ok(())
    }

    // Helpers below assume the caller holds the gate of the task they touch.
    fn gate(&self, task_id: TaskId) -> Arc<AsyncMutex<()>> {
        self.inner.gates.lock().entry(task_id).or_default().clone()
    }

    fn enqueue(&self, task: &Task) {
        self.inner.queue.lock().push(QueueEntry::from(task));
    }

    fn apply(
        &self,
        task_id: TaskId,
        event: TaskEvent,
        linkage: Linkage,
    ) -> Result<Applied, SchedulerError> {
        let applied = self.inner.registry.apply(task_id, event, linkage)?;
        self.record(&applied, event, None);
        Ok(applied)
    }

    fn record(&self, applied: &Applied, event: TaskEvent, detail: Option<String>) {
        tracing::info!(
            "task {}: {} -> {} ({})",
            applied.task.id,
            applied.from,
            applied.to,
            event
        );
        self.audit(
            applied.task.id,
            &event.to_string(),
            Some(applied.from),
            Some(applied.to),
            detail,
        );
    }

    fn audit(
        &self,
        task_id: TaskId,
        action: &str,
        from: Option<TaskState>,
        to: Option<TaskState>,
        detail: Option<String>,
    ) {
        if let Some(sink) = self.inner.audit.lock().as_mut() {
            sink.record(build_audit_event(task_id, action, from, to, detail));
        }
    }

    fn release(&self, task_id: TaskId) {
        if self.inner.admission.release(task_id).is_some() {
            self.inner.wake.notify_one();
        }
    }

    fn persist(&self) {
        let Some(store) = &self.inner.store else {
            return;
        };
        let _guard = self.inner.persist_lock.lock();
        let snapshot = StateSnapshot::new(
            self.inner.registry.list(None),
            self.inner.checkpoints.all(),
        );
        if let Err(err) = store.save(&snapshot) {
            tracing::error!("failed to persist scheduler state: {}", err);
        }
    }

    async fn admit_and_realize(&self, task: Task) -> Result<AdmissionOutcome, SchedulerError> {
        let running = self.inner.registry.list(Some(TaskState::Running));
        match self.inner.admission.admit(&task, &running) {
            Ok(AdmissionDecision::Admitted) => match self.realize(task).await? {
                Realized::Started => Ok(AdmissionOutcome::Admitted),
                Realized::Cancelled => Ok(AdmissionOutcome::Cancelled),
            },
            Ok(AdmissionDecision::Preempt(victims)) => {
                let eviction = self.preempt(&task, &victims).await;
                if let Some(reason) = &eviction.failure {
                    tracing::warn!(
                        "preemption for task {} stopped after {} of {} victim(s): {}",
                        task.id,
                        eviction.evicted.len(),
                        victims.len(),
                        reason
                    );
                }
                // Capacity freed by a partial eviction is still used when it suffices.
                match self.inner.admission.complete_preemption(&task) {
                    Ok(_) => match self.realize(task).await? {
                        Realized::Started if eviction.evicted.is_empty() => {
                            Ok(AdmissionOutcome::Admitted)
                        }
                        Realized::Started => Ok(AdmissionOutcome::Preempted(eviction.evicted)),
                        Realized::Cancelled => Ok(AdmissionOutcome::Cancelled),
                    },
                    Err(err) if err.is_capacity() => {
                        let partial = eviction
                            .failure
                            .as_ref()
                            .filter(|_| !eviction.evicted.is_empty());
                        if let Some(reason) = partial {
                            let evicted: Vec<String> =
                                eviction.evicted.iter().map(ToString::to_string).collect();
                            self.audit(
                                task.id,
                                "preemption_abandoned",
                                Some(task.state),
                                Some(task.state),
                                Some(format!("evicted [{}]; {reason}", evicted.join(", "))),
                            );
                        }
                        self.enqueue(&task);
                        self.inner.wake.notify_one();
                        Ok(AdmissionOutcome::Queued {
                            reason: eviction.failure.unwrap_or_else(|| err.to_string()),
                        })
                    }
                    Err(err) => Err(err),
                }
            }
            Err(err) if err.is_capacity() => {
                tracing::debug!("task {} queued: {}", task.id, err);
                self.enqueue(&task);
                Ok(AdmissionOutcome::Queued {
                    reason: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    // Evict `victims` back to PENDING. Every victim gate must be free; a busy one
    // abandons the whole preemption before anything is touched. A failure part way
    // through keeps the victims already evicted.
    async fn preempt(&self, task: &Task, victims: &[TaskId]) -> Eviction {
        let mut eviction = Eviction::default();
        let mut guards: Vec<OwnedMutexGuard<()>> = Vec::with_capacity(victims.len());
        for victim in victims {
            if let Ok(guard) = self.gate(*victim).try_lock_owned() {
                guards.push(guard);
            } else {
                eviction.failure = Some(format!("victim {victim} is busy"));
                return eviction;
            }
        }

        for victim_id in victims {
            let victim = match self.inner.registry.get(*victim_id) {
                Ok(v) if v.state == TaskState::Running => v,
                _ => continue,
            };
            if let Some(container) = &victim.container {
                if let Err(err) = self.stop_container(container).await {
                    eviction.failure = Some(format!("stopping victim {victim_id}: {err}"));
                    break;
                }
                self.remove_container(container).await;
            }
            self.inner.admission.release(*victim_id);
            let applied = match self
                .inner
                .registry
                .apply(*victim_id, TaskEvent::Preempted, Linkage::Keep)
            {
                Ok(applied) => applied,
                Err(err) => {
                    eviction.failure = Some(err.to_string());
                    break;
                }
            };
            self.record(
                &applied,
                TaskEvent::Preempted,
                Some(format!("preempted by {}", task.id)),
            );
            self.enqueue(&applied.task);
            eviction.evicted.push(*victim_id);
            tracing::info!("task {} preempted by task {}", victim_id, task.id);
        }
        drop(guards);
        if !eviction.evicted.is_empty() {
            self.persist();
        }
        eviction
    }

    // Reservation is held. Realizes the container and settles the task in RUNNING,
    // PENDING (retry), FAILED, or STOPPED (cancelled by a concurrent delete).
    async fn realize(&self, task: Task) -> Result<Realized, SchedulerError> {
        let task_id = task.id;
        if let Err(err) = self.apply(task_id, TaskEvent::Admitted, Linkage::Keep) {
            self.release(task_id);
            return Err(err);
        }
        self.inner.queue.lock().remove(task_id);

        let result = self.run_container(&task).await;
        let cancelled = self.inner.cancellations.lock().contains(&task_id);

        let outcome = match result {
            Ok(container) if cancelled => {
                tracing::info!("task {} deleted during realization, cancelling", task_id);
                if let Err(err) = self.stop_container(&container).await {
                    tracing::error!(
                        "stopping cancelled container {} of task {}: {}",
                        container,
                        task_id,
                        err
                    );
                }
                self.remove_container(&container).await;
                self.release(task_id);
                self.apply(task_id, TaskEvent::Cancelled, Linkage::Keep)
                    .map(|_| Realized::Cancelled)
            }
            Ok(container) => self
                .apply(task_id, TaskEvent::Started, Linkage::Set(container))
                .map(|_| Realized::Started),
            Err(err) => {
                self.release(task_id);
                Err(self.settle_failure(task_id, &err, cancelled))
            }
        };
        self.persist();
        outcome
    }

    // Settles a failed realization and returns the error to surface.
    fn settle_failure(&self, task_id: TaskId, err: &DriverError, cancelled: bool) -> SchedulerError {
        match self.try_settle_failure(task_id, err, cancelled) {
            Ok(()) => err.clone().into(),
            Err(surfaced) => surfaced,
        }
    }

    fn try_settle_failure(
        &self,
        task_id: TaskId,
        err: &DriverError,
        cancelled: bool,
    ) -> Result<(), SchedulerError> {
        let message = err.to_string();
        let transient = err.is_transient();
        let task = self.inner.registry.update(task_id, |t| {
            t.last_error = Some(message.clone());
            if transient {
                t.retry_count = t.retry_count.saturating_add(1);
            }
        })?;

        if cancelled {
            self.apply(task_id, TaskEvent::Cancelled, Linkage::Keep)?;
            return Err(err.clone().into());
        }

        if transient && task.retry_count <= self.inner.config.max_start_retries {
            tracing::warn!(
                "task {} realization failed (attempt {}/{}), requeueing: {}",
                task_id,
                task.retry_count,
                self.inner.config.max_start_retries,
                message
            );
            let applied = self.apply(task_id, TaskEvent::TransientFailure, Linkage::Keep)?;
            self.enqueue(&applied.task);
            return Err(SchedulerError::RuntimeTransient(message));
        }

        tracing::error!("task {} failed: {}", task_id, message);
        self.apply(task_id, TaskEvent::FatalFailure, Linkage::Keep)?;
        if transient {
            let exhausted = format!("retries exhausted after {} attempts: {message}", task.retry_count);
            self.inner
                .registry
                .update(task_id, |t| t.last_error = Some(exhausted.clone()))?;
            Err(SchedulerError::RuntimeFatal(exhausted))
        } else {
            Err(err.clone().into())
        }
    }

    async fn run_container(&self, task: &Task) -> Result<ContainerRef, DriverError> {
        let driver = &self.inner.driver;
        let descriptor = &task.descriptor;
        driver.ensure_image(&descriptor.image).await?;
        let spec = ContainerSpec {
            name: format!("task_{}", task.id),
            image: descriptor.image.clone(),
            command: descriptor.command.clone(),
            resources: descriptor.resources.clone(),
        };
        let container = driver.create_container(&spec).await?;
        if let Err(err) = driver.start(&container).await {
            self.remove_container(&container).await;
            return Err(err);
        }
        Ok(container)
    }

    // Graceful stop within the grace period, then a forced stop. A container that is
    // already gone counts as stopped.
    async fn stop_container(&self, container: &ContainerRef) -> Result<(), DriverError> {
        let driver = &self.inner.driver;
        match driver.stop(container, self.inner.config.stop_grace()).await {
            Ok(()) | Err(DriverError::NotFound(_)) => Ok(()),
            Err(err) => {
                tracing::warn!("graceful stop of {} failed, forcing: {}", container, err);
                match driver.stop(container, Duration::ZERO).await {
                    Ok(()) | Err(DriverError::NotFound(_)) => Ok(()),
                    Err(err) => Err(err),
                }
            }
        }
    }

    async fn remove_container(&self, container: &ContainerRef) {
        match self.inner.driver.remove(container).await {
            Ok(()) | Err(DriverError::NotFound(_)) => {}
            Err(err) => tracing::warn!("failed to remove container {}: {}", container, err),
        }
    }

    async fn stop_locked(&self, task_id: TaskId) -> Result<Applied, SchedulerError> {
        let task = self.inner.registry.check(task_id, TaskEvent::StopRequested)?;
        if let Some(container) = &task.container {
            self.stop_container(container).await?;
            self.remove_container(container).await;
        }
        self.release(task_id);
        self.inner.queue.lock().remove(task_id);
        self.inner.checkpoints.set_resume_pending(task_id, false);
        self.apply(task_id, TaskEvent::StopRequested, Linkage::Keep)
    }

    async fn resume_locked(&self, task_id: TaskId) -> Result<ResumeOutcome, SchedulerError> {
        let inner = &self.inner;
        let attempt = inner
            .checkpoints
            .resume(
                &inner.registry,
                &inner.admission,
                inner.driver.as_ref(),
                task_id,
            )
            .await?;
        match attempt {
            ResumeAttempt::Resumed(applied) => {
                inner.queue.lock().remove(task_id);
                self.record(&applied, TaskEvent::ResumeRequested, None);
                Ok(ResumeOutcome::Resumed)
            }
            ResumeAttempt::Queued(reason) => {
                tracing::info!("task {} waiting for capacity to resume: {}", task_id, reason);
                let task = inner.registry.get(task_id)?;
                self.enqueue(&task);
                Ok(ResumeOutcome::Queued { reason })
            }
        }
    }

    async fn delete_locked(&self, task_id: TaskId) -> Result<(), SchedulerError> {
        let task = self.inner.registry.get(task_id)?;
        let cancelled = self.inner.cancellations.lock().contains(&task_id);
        // The realization finished just before the cancellation was seen.
        if cancelled && task.state == TaskState::Running {
            self.stop_locked(task_id).await?;
        }
        self.inner.registry.check(task_id, TaskEvent::Deleted)?;

        self.inner.queue.lock().remove(task_id);
        self.release(task_id);
        self.apply(task_id, TaskEvent::Deleted, Linkage::Keep)?;
        self.inner.checkpoints.forget(task_id);
        Ok(())
    }

    async fn reconcile_running(&self) {
        let mut changed = false;
        for task in self.inner.registry.list(Some(TaskState::Running)) {
            let Ok(_guard) = self.gate(task.id).try_lock_owned() else {
                continue;
            };
            let task = match self.inner.registry.get(task.id) {
                Ok(t) if t.state == TaskState::Running => t,
                _ => continue,
            };
            let Some(container) = task.container.clone() else {
                continue;
            };

            let (event, error, present) = match self.inner.driver.inspect(&container).await {
                Ok(ContainerStatus::Exited { code: 0 }) => (TaskEvent::Exited, None, true),
                Ok(ContainerStatus::Exited { code }) => (
                    TaskEvent::Crashed,
                    Some(format!("container exited with code {code}")),
                    true,
                ),
                Ok(_) => continue,
                Err(DriverError::NotFound(_)) => {
                    (TaskEvent::Crashed, Some("container vanished".to_string()), false)
                }
                Err(err) => {
                    tracing::warn!("inspect of task {} failed: {}", task.id, err);
                    continue;
                }
            };

            if present {
                self.remove_container(&container).await;
            }
            self.release(task.id);
            if let Some(message) = &error {
                if let Err(err) = self
                    .inner
                    .registry
                    .update(task.id, |t| t.last_error = Some(message.clone()))
                {
                    tracing::error!("recording failure of task {}: {}", task.id, err);
                }
            }
            match self.apply(task.id, event, Linkage::Keep) {
                Ok(_) => changed = true,
                Err(err) => tracing::error!("reconciling task {}: {}", task.id, err),
            }
        }
        if changed {
            self.persist();
        }
    }

    fn reap_terminal(&self) -> usize {
        let Some(retention_secs) = self.inner.config.terminal_retention_secs else {
            return 0;
        };
        let cutoff = now_ms().saturating_sub(u128::from(retention_secs) * 1000);
        let mut reaped = 0;
        for task in self.inner.registry.list(None) {
            if !task.state.is_terminal() || task.last_transition_at_ms > cutoff {
                continue;
            }
            let gate = self.gate(task.id);
            let Ok(guard) = gate.try_lock_owned() else {
                continue;
            };
            match self.apply(task.id, TaskEvent::Deleted, Linkage::Keep) {
                Ok(_) => {
                    self.inner.checkpoints.forget(task.id);
                    reaped += 1;
                }
                Err(err) => tracing::error!("reaping task {}: {}", task.id, err),
            }
            drop(guard);
            self.inner.gates.lock().remove(&task.id);
        }
        if reaped > 0 {
            tracing::info!("reaped {} terminal task(s)", reaped);
            self.persist();
        }
        reaped
    }

    /// Rebuild in-memory state from the store.
    pub(crate) fn restore(&self) -> Result<(), SchedulerError> {
        let Some(store) = &self.inner.store else {
            return Ok(());
        };
        let Some(snapshot) = store.load()? else {
            return Ok(());
        };
        let inner = &self.inner;
        inner.registry.restore(snapshot.tasks);
        inner.checkpoints.restore(snapshot.checkpoints);

        for task in inner.registry.list(None) {
            match task.state {
                TaskState::Running => self.restore_reservation(&task)?,
                TaskState::Paused if !inner.checkpoints.reservation_released(task.id) => {
                    self.restore_reservation(&task)?;
                }
                TaskState::Paused if inner.checkpoints.resume_pending(task.id) => {
                    self.enqueue(&task);
                }
                TaskState::Scheduled => {
                    let applied = inner.registry.apply(
                        task.id,
                        TaskEvent::TransientFailure,
                        Linkage::Keep,
                    )?;
                    tracing::warn!("task {} was mid-realization at shutdown, requeued", task.id);
                    self.enqueue(&applied.task);
                }
                TaskState::Pending => self.enqueue(&task),
                _ => {}
            }
        }
        tracing::info!("restored {} task(s) from state store", inner.registry.len());
        Ok(())
    }

    fn restore_reservation(&self, task: &Task) -> Result<(), SchedulerError> {
        if self.inner.admission.reserve(task.id, &task.descriptor.resources) {
            Ok(())
        } else {
            Err(self.inner.admission.capacity_error(&task.descriptor.resources))
        }
    }
}
