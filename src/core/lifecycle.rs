//! Task lifecycle state machine.
//!
//! Every state change in the crate goes through [`transition`]; the table below is the
//! only place that knows which `(state, event)` pairs are legal.
//!
//! | From      | Event              | To        |
//! |-----------|--------------------|-----------|
//! | Pending   | `Admitted`         | Scheduled |
//! | Pending   | `Reconfigured`     | Pending   |
//! | Pending   | `Deleted`          | Deleted   |
//! | Scheduled | `Started`          | Running   |
//! | Scheduled | `TransientFailure` | Pending   |
//! | Scheduled | `FatalFailure`     | Failed    |
//! | Scheduled | `Cancelled`        | Stopped   |
//! | Running   | `StopRequested`    | Stopped   |
//! | Running   | `Exited`           | Stopped   |
//! | Running   | `Crashed`          | Failed    |
//! | Running   | `Preempted`        | Pending   |
//! | Running   | `PauseRequested`   | Paused    |
//! | Paused    | `ResumeRequested`  | Running   |
//! | Paused    | `StopRequested`    | Stopped   |
//! | Stopped   | `Deleted`          | Deleted   |
//! | Failed    | `Deleted`          | Deleted   |

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for admission.
    Pending,
    /// Admitted; the runtime is realizing the container.
    Scheduled,
    /// Container is running.
    Running,
    /// Container is frozen.
    Paused,
    /// Stopped by request or by a clean exit.
    Stopped,
    /// Failed fatally.
    Failed,
    /// Removed from the registry.
    Deleted,
}

impl TaskState {
    /// All states, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Pending,
        Self::Scheduled,
        Self::Running,
        Self::Paused,
        Self::Stopped,
        Self::Failed,
        Self::Deleted,
    ];

    /// States in which a task must carry a container linkage.
    pub const fn holds_container(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// States eligible for terminal cleanup.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Scheduled => "SCHEDULED",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
            Self::Deleted => "DELETED",
        };
        f.write_str(name)
    }
}

/// Event driving a lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEvent {
    /// Admission granted and reservation held.
    Admitted,
    /// Priority or requirements of a queued task changed.
    Reconfigured,
    /// Runtime start succeeded.
    Started,
    /// Runtime realization failed in a retryable way.
    TransientFailure,
    /// Runtime realization failed non-retryably or retries ran out.
    FatalFailure,
    /// Deleted while realization was in flight.
    Cancelled,
    /// Operator stop.
    StopRequested,
    /// Container exited cleanly.
    Exited,
    /// Container exited non-zero or vanished.
    Crashed,
    /// Evicted for a higher-priority task.
    Preempted,
    /// Operator pause.
    PauseRequested,
    /// Operator resume.
    ResumeRequested,
    /// Terminal removal.
    Deleted,
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Admitted => "admit",
            Self::Reconfigured => "update",
            Self::Started => "start",
            Self::TransientFailure => "transient failure",
            Self::FatalFailure => "fatal failure",
            Self::Cancelled => "cancel",
            Self::StopRequested => "stop",
            Self::Exited => "exit",
            Self::Crashed => "crash",
            Self::Preempted => "preempt",
            Self::PauseRequested => "pause",
            Self::ResumeRequested => "resume",
            Self::Deleted => "delete",
        };
        f.write_str(name)
    }
}

/// Look up the target state for `event` in `from`. `None` means the transition is illegal.
pub const fn transition(from: TaskState, event: TaskEvent) -> Option<TaskState> {
    use TaskEvent as E;
    use TaskState as S;

    let to = match (from, event) {
        (S::Pending, E::Admitted) => S::Scheduled,
        (S::Pending, E::Reconfigured) => S::Pending,
        (S::Pending | S::Stopped | S::Failed, E::Deleted) => S::Deleted,
        (S::Scheduled, E::Started) | (S::Paused, E::ResumeRequested) => S::Running,
        (S::Scheduled, E::TransientFailure) | (S::Running, E::Preempted) => S::Pending,
        (S::Scheduled, E::FatalFailure) | (S::Running, E::Crashed) => S::Failed,
        (S::Scheduled, E::Cancelled)
        | (S::Running | S::Paused, E::StopRequested)
        | (S::Running, E::Exited) => S::Stopped,
        (S::Running, E::PauseRequested) => S::Paused,
        _ => return None,
    };
    Some(to)
}
