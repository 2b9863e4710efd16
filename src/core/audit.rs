//! Audit trail of task lifecycle changes.
//!
//! The scheduler records one event per lifecycle transition plus submissions.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::lifecycle::TaskState;
use crate::util::clock::now_ms;
use crate::util::serde::TaskId;

/// One recorded lifecycle change.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Unique id (UUID v4).
    pub event_id: String,
    /// Task the event belongs to.
    pub task_id: TaskId,
    /// Action taken (submit, admit, start, preempt, pause, resume, stop, delete, ...).
    pub action: String,
    /// State before the action, if the task existed.
    pub from: Option<TaskState>,
    /// State after the action.
    pub to: Option<TaskState>,
    /// When the event was recorded (ms since epoch).
    pub recorded_at_ms: u128,
    /// Failure message or other detail.
    pub detail: Option<String>,
}

/// Destination for audit events.
pub trait AuditSink: Send {
    /// Store one event.
    fn record(&mut self, event: AuditEvent);
}

/// Bounded in-memory sink; the oldest event is dropped when full.
///
/// Clones share the same bounded buffer, so a test can keep one handle and give
/// another to the scheduler.
#[derive(Debug, Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Sink that keeps at most `max_events` events.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events))),
            max_events,
        }
    }

    /// Copy of the buffered events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Actions recorded for one task, oldest first.
    pub fn actions_for(&self, task_id: TaskId) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.task_id == task_id)
            .map(|e| e.action.clone())
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Build an event stamped with a fresh id and the current time.
pub fn build_audit_event(
    task_id: TaskId,
    action: impl Into<String>,
    from: Option<TaskState>,
    to: Option<TaskState>,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        task_id,
        action: action.into(),
        from,
        to,
        recorded_at_ms: now_ms(),
        detail,
    }
}
