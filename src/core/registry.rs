//! Task registry: the single source of truth for task existence and state.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::core::lifecycle::{transition, TaskEvent, TaskState};
use crate::core::task::{ContainerRef, Task, TaskDescriptor};
use crate::core::SchedulerError;
use crate::util::clock::now_ms;
use crate::util::serde::TaskId;

/// What a transition does to the container linkage of a task that ends up in a
/// container-holding state. Leaving such a state always clears the linkage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Linkage {
    /// Keep whatever linkage the task has.
    Keep,
    /// Link the task to this container.
    Set(ContainerRef),
}

/// Result of an applied transition.
#[derive(Debug, Clone)]
pub struct Applied {
    /// State before.
    pub from: TaskState,
    /// State after.
    pub to: TaskState,
    /// Task after the transition (the removed task for `Deleted`).
    pub task: Task,
}

/// Collection of tasks keyed by id.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, Task>>,
    next_seq: AtomicU64,
}

impl TaskRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a PENDING task for an already validated descriptor.
    pub fn insert(&self, descriptor: TaskDescriptor) -> Task {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let task = Task::new(uuid::Uuid::new_v4(), descriptor, seq, now_ms());
        self.tasks.write().insert(task.id, task.clone());
        task
    }

    /// Replace the registry contents with restored tasks.
    pub fn restore(&self, tasks: impl IntoIterator<Item = Task>) {
        let mut map = self.tasks.write();
        map.clear();
        let mut max_seq = None;
        for task in tasks {
            max_seq = max_seq.max(Some(task.seq));
            map.insert(task.id, task);
        }
        self.next_seq
            .store(max_seq.map_or(0, |s| s + 1), Ordering::Relaxed);
    }

    /// Clone of one task.
    pub fn get(&self, id: TaskId) -> Result<Task, SchedulerError> {
        self.tasks
            .read()
            .get(&id)
            .cloned()
            .ok_or(SchedulerError::NotFound(id))
    }

    /// All tasks, optionally filtered by state, in submission order.
    pub fn list(&self, filter: Option<TaskState>) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .values()
            .filter(|t| filter.is_none_or(|s| t.state == s))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.seq);
        tasks
    }

    /// Number of tasks per state (every state present, zero when empty).
    pub fn count_by_state(&self) -> BTreeMap<TaskState, usize> {
        let mut counts: BTreeMap<TaskState, usize> = TaskState::ALL
            .into_iter()
            .filter(|s| *s != TaskState::Deleted)
            .map(|s| (s, 0))
            .collect();
        for task in self.tasks.read().values() {
            *counts.entry(task.state).or_insert(0) += 1;
        }
        counts
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    /// Check `event` against the lifecycle table without applying it.
    pub fn check(&self, id: TaskId, event: TaskEvent) -> Result<Task, SchedulerError> {
        let task = self.get(id)?;
        if transition(task.state, event).is_none() {
            return Err(SchedulerError::InvalidTransition {
                task_id: id,
                state: task.state,
                event,
            });
        }
        Ok(task)
    }

    /// Apply `event` to a task through the lifecycle table.
    ///
    /// `Deleted` removes the task. Entering Running or Paused requires a linkage (new or
    /// kept); entering any other state clears it.
    pub fn apply(
        &self,
        id: TaskId,
        event: TaskEvent,
        linkage: Linkage,
    ) -> Result<Applied, SchedulerError> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&id).ok_or(SchedulerError::NotFound(id))?;
        let from = task.state;
        let invalid = || SchedulerError::InvalidTransition {
            task_id: id,
            state: from,
            event,
        };
        let to = transition(from, event).ok_or_else(invalid)?;

        if to == TaskState::Deleted {
            let mut removed = tasks.remove(&id).ok_or(SchedulerError::NotFound(id))?;
            removed.state = TaskState::Deleted;
            removed.container = None;
            removed.last_transition_at_ms = now_ms();
            return Ok(Applied {
                from,
                to,
                task: removed,
            });
        }

        let container = if to.holds_container() {
            match linkage {
                Linkage::Set(container) => Some(container),
                Linkage::Keep => Some(task.container.clone().ok_or_else(invalid)?),
            }
        } else {
            None
        };

        task.container = container;
        task.state = to;
        task.last_transition_at_ms = now_ms();
        Ok(Applied {
            from,
            to,
            task: task.clone(),
        })
    }

    /// Mutate the non-state fields of a task.
    pub fn update<F>(&self, id: TaskId, f: F) -> Result<Task, SchedulerError>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&id).ok_or(SchedulerError::NotFound(id))?;
        let (state, container) = (task.state, task.container.clone());
        f(task);
        task.state = state;
        task.container = container;
        Ok(task.clone())
    }

    /// Replace the descriptor of a task.
    pub fn set_descriptor(
        &self,
        id: TaskId,
        descriptor: TaskDescriptor,
    ) -> Result<Task, SchedulerError> {
        self.update(id, |task| task.descriptor = descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::ResourceRequirements;

    fn descriptor() -> TaskDescriptor {
        TaskDescriptor::new("job", "alpine:latest")
            .with_resources(ResourceRequirements::new().with_cpu_shares(1))
    }

    #[test]
    fn test_insert_assigns_increasing_seq() {
        let reg = TaskRegistry::new();
        let a = reg.insert(descriptor());
        let b = reg.insert(descriptor());
        assert!(b.seq > a.seq);
        assert_ne!(a.id, b.id);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_apply_sets_and_clears_linkage() {
        let reg = TaskRegistry::new();
        let t = reg.insert(descriptor());
        reg.apply(t.id, TaskEvent::Admitted, Linkage::Keep).unwrap();
        let running = reg
            .apply(t.id, TaskEvent::Started, Linkage::Set(ContainerRef::new("c1")))
            .unwrap();
        assert_eq!(running.task.container, Some(ContainerRef::new("c1")));

        let paused = reg.apply(t.id, TaskEvent::PauseRequested, Linkage::Keep).unwrap();
        assert_eq!(paused.task.container, Some(ContainerRef::new("c1")));

        let stopped = reg.apply(t.id, TaskEvent::StopRequested, Linkage::Keep).unwrap();
        assert_eq!(stopped.task.container, None);
        assert!(stopped.task.linkage_consistent());
    }

    #[test]
    fn test_entering_running_without_container_is_rejected() {
        let reg = TaskRegistry::new();
        let t = reg.insert(descriptor());
        reg.apply(t.id, TaskEvent::Admitted, Linkage::Keep).unwrap();
        let err = reg.apply(t.id, TaskEvent::Started, Linkage::Keep).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTransition { .. }));
        assert_eq!(reg.get(t.id).unwrap().state, TaskState::Scheduled);
    }

    #[test]
    fn test_illegal_event_leaves_task_untouched() {
        let reg = TaskRegistry::new();
        let t = reg.insert(descriptor());
        let before = reg.get(t.id).unwrap();
        assert!(reg.apply(t.id, TaskEvent::PauseRequested, Linkage::Keep).is_err());
        assert_eq!(reg.get(t.id).unwrap(), before);
    }

    #[test]
    fn test_delete_removes() {
        let reg = TaskRegistry::new();
        let t = reg.insert(descriptor());
        let applied = reg.apply(t.id, TaskEvent::Deleted, Linkage::Keep).unwrap();
        assert_eq!(applied.to, TaskState::Deleted);
        assert!(matches!(reg.get(t.id), Err(SchedulerError::NotFound(_))));
    }

    #[test]
    fn test_update_cannot_touch_state() {
        let reg = TaskRegistry::new();
        let t = reg.insert(descriptor());
        let updated = reg
            .update(t.id, |task| {
                task.retry_count = 2;
                task.state = TaskState::Running;
            })
            .unwrap();
        assert_eq!(updated.retry_count, 2);
        assert_eq!(updated.state, TaskState::Pending);
    }

    #[test]
    fn test_restore_continues_sequence() {
        let reg = TaskRegistry::new();
        let mut t = Task::new(uuid::Uuid::new_v4(), descriptor(), 41, 5);
        t.state = TaskState::Stopped;
        reg.restore([t]);
        assert_eq!(reg.insert(descriptor()).seq, 42);
        assert_eq!(reg.count_by_state()[&TaskState::Stopped], 1);
    }
}
