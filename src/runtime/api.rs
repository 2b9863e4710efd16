//! API-facing request/response models.

use serde::{Deserialize, Serialize};

use crate::core::scheduler::Scheduler;
use crate::core::task::{ResourceRequirements, TaskDescriptor, TaskView};
use crate::core::SchedulerError;
use crate::util::serde::Priority;

/// Task submission payload as received from the management API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSubmission {
    /// Task name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Command override.
    #[serde(default)]
    pub command: Vec<String>,
    /// Priority (`low`, `normal`/`medium`, `high`, `critical`).
    #[serde(default)]
    pub priority: Priority,
    /// CPU shares (1024 = one core).
    #[serde(default)]
    pub cpu_shares: Option<u64>,
    /// Memory limit such as `"512m"`.
    #[serde(default)]
    pub memory: Option<String>,
    /// Memory plus swap limit such as `"1g"`.
    #[serde(default)]
    pub memory_swap: Option<String>,
}

impl TaskSubmission {
    /// Convert into a descriptor, parsing memory quantities.
    pub fn into_descriptor(self) -> Result<TaskDescriptor, SchedulerError> {
        let mut resources = ResourceRequirements::new();
        if let Some(shares) = self.cpu_shares {
            resources = resources.with_cpu_shares(shares);
        }
        if let Some(memory) = &self.memory {
            resources = resources.with_memory(memory)?;
        }
        if let Some(swap) = &self.memory_swap {
            resources = resources.with_memory_swap(swap)?;
        }
        Ok(TaskDescriptor::new(self.name, self.image)
            .with_command(self.command)
            .with_priority(self.priority)
            .with_resources(resources))
    }
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
}

/// Submit a task and return its view.
pub async fn submit_task(
    scheduler: &Scheduler,
    req: TaskSubmission,
) -> Result<TaskView, SchedulerError> {
    let descriptor = req.into_descriptor()?;
    let task_id = scheduler.submit(descriptor)?;
    scheduler.get(task_id)
}

/// Return a health payload.
pub fn health() -> Health {
    Health { ok: true }
}
