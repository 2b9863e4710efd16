//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::lifecycle::{TaskEvent, TaskState};
use crate::runtime::DriverError;
use crate::util::serde::{ResourceKind, TaskId};

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Task descriptor rejected before registry insertion.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Admission impossible even after preemption evaluation; the task stays queued.
    #[error("insufficient {dimension}: requested {requested}, available {available}")]
    Capacity {
        /// First dimension found short.
        dimension: ResourceKind,
        /// Amount the task asked for.
        requested: u64,
        /// Amount currently uncommitted.
        available: u64,
    },
    /// Lifecycle operation not allowed from the task's current state.
    #[error("task {task_id}: `{event}` is not allowed in state {state}")]
    InvalidTransition {
        /// Task the operation targeted.
        task_id: TaskId,
        /// State the task was in.
        state: TaskState,
        /// Rejected event.
        event: TaskEvent,
    },
    /// Driver call failed in a retryable way.
    #[error("runtime transient failure: {0}")]
    RuntimeTransient(String),
    /// Driver call failed non-retryably.
    #[error("runtime fatal failure: {0}")]
    RuntimeFatal(String),
    /// Unknown task id.
    #[error("task not found: {0}")]
    NotFound(TaskId),
    /// State store read or write failure.
    #[error("persistence error: {0}")]
    Persistence(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl SchedulerError {
    /// Whether the error means "accepted but pending" rather than a hard failure.
    pub const fn is_capacity(&self) -> bool {
        matches!(self, Self::Capacity { .. })
    }
}

impl From<DriverError> for SchedulerError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Transient(msg) => Self::RuntimeTransient(msg),
            DriverError::Fatal(msg) => Self::RuntimeFatal(msg),
            DriverError::NotFound(id) => Self::RuntimeFatal(format!("container not found: {id}")),
        }
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
