//! In-memory pending queue ordered by priority, then age.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use crate::core::task::Task;
use crate::util::serde::{Priority, TaskId};

/// Ordering key for one queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    /// Task waiting for admission (or for a resume reservation).
    pub task_id: TaskId,
    /// Priority at enqueue time.
    pub priority: Priority,
    /// Task creation time.
    pub created_at_ms: u128,
    /// Submission sequence; breaks equal timestamps.
    pub seq: u64,
}

impl From<&Task> for QueueEntry {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            priority: task.priority(),
            created_at_ms: task.created_at_ms,
            seq: task.seq,
        }
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then oldest first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.created_at_ms.cmp(&other.created_at_ms))
            .then_with(|| self.seq.cmp(&other.seq))
            .then_with(|| self.task_id.cmp(&other.task_id))
    }
}

/// Pending queue with O(log n) insert, removal by id, and ordered traversal.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    ordered: BTreeSet<QueueEntry>,
    index: HashMap<TaskId, QueueEntry>,
}

impl InMemoryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or re-key a task.
    pub fn push(&mut self, entry: QueueEntry) {
        if let Some(previous) = self.index.insert(entry.task_id, entry) {
            self.ordered.remove(&previous);
        }
        self.ordered.insert(entry);
    }

    /// Remove a task; returns whether it was queued.
    pub fn remove(&mut self, task_id: TaskId) -> bool {
        match self.index.remove(&task_id) {
            Some(entry) => {
                self.ordered.remove(&entry);
                true
            }
            None => false,
        }
    }

    /// Pop the highest-priority, oldest task.
    pub fn pop(&mut self) -> Option<QueueEntry> {
        let entry = self.ordered.pop_first()?;
        self.index.remove(&entry.task_id);
        Some(entry)
    }

    /// Whether `task_id` is queued.
    pub fn contains(&self, task_id: TaskId) -> bool {
        self.index.contains_key(&task_id)
    }

    /// Task ids in service order.
    pub fn ordered_ids(&self) -> Vec<TaskId> {
        self.ordered.iter().map(|e| e.task_id).collect()
    }

    /// Current depth.
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entry(priority: Priority, created_at_ms: u128, seq: u64) -> QueueEntry {
        QueueEntry {
            task_id: Uuid::new_v4(),
            priority,
            created_at_ms,
            seq,
        }
    }

    #[test]
    fn test_priority_ordering() {
        let mut q = InMemoryQueue::new();
        let low = entry(Priority::Low, 100, 0);
        let critical = entry(Priority::Critical, 200, 1);
        let normal = entry(Priority::Normal, 300, 2);
        let high = entry(Priority::High, 400, 3);
        for e in [low, critical, normal, high] {
            q.push(e);
        }

        assert_eq!(q.pop().unwrap().task_id, critical.task_id);
        assert_eq!(q.pop().unwrap().task_id, high.task_id);
        assert_eq!(q.pop().unwrap().task_id, normal.task_id);
        assert_eq!(q.pop().unwrap().task_id, low.task_id);
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut q = InMemoryQueue::new();
        let late = entry(Priority::Normal, 300, 0);
        let early = entry(Priority::Normal, 100, 1);
        let tie_first = entry(Priority::Normal, 200, 2);
        let tie_second = entry(Priority::Normal, 200, 3);
        for e in [late, tie_second, early, tie_first] {
            q.push(e);
        }

        assert_eq!(
            q.ordered_ids(),
            vec![early.task_id, tie_first.task_id, tie_second.task_id, late.task_id]
        );
    }

    #[test]
    fn test_remove_and_rekey() {
        let mut q = InMemoryQueue::new();
        let a = entry(Priority::Low, 100, 0);
        let b = entry(Priority::Normal, 200, 1);
        q.push(a);
        q.push(b);
        assert_eq!(q.ordered_ids()[0], b.task_id);

        q.push(QueueEntry {
            priority: Priority::Critical,
            ..a
        });
        assert_eq!(q.len(), 2);
        assert_eq!(q.ordered_ids()[0], a.task_id);

        assert!(q.remove(a.task_id));
        assert!(!q.remove(a.task_id));
        assert!(!q.contains(a.task_id));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_empty_queue() {
        let mut q = InMemoryQueue::new();
        assert!(q.pop().is_none());
        assert!(q.is_empty());
    }
}
