//! Task entity, descriptor validation, and read-only views.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::lifecycle::TaskState;
use crate::core::SchedulerError;
use crate::util::serde::{Priority, ResourceKind, TaskId};
use crate::util::units::parse_memory;

/// Declared resource quantities, one entry per dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceRequirements(BTreeMap<ResourceKind, u64>);

impl ResourceRequirements {
    /// Empty requirement set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the amount requested for one dimension.
    #[must_use]
    pub fn with(mut self, kind: ResourceKind, amount: u64) -> Self {
        self.0.insert(kind, amount);
        self
    }

    /// Set CPU shares (1024 = one core).
    #[must_use]
    pub fn with_cpu_shares(self, shares: u64) -> Self {
        self.with(ResourceKind::Cpu, shares)
    }

    /// Set memory from a human quantity such as `"512m"`.
    pub fn with_memory(self, quantity: &str) -> Result<Self, SchedulerError> {
        let bytes = parse_memory(quantity).map_err(SchedulerError::Validation)?;
        Ok(self.with(ResourceKind::Memory, bytes))
    }

    /// Set memory plus swap from a human quantity such as `"2g"`.
    pub fn with_memory_swap(self, quantity: &str) -> Result<Self, SchedulerError> {
        let bytes = parse_memory(quantity).map_err(SchedulerError::Validation)?;
        Ok(self.with(ResourceKind::MemorySwap, bytes))
    }

    /// Amount requested for `kind`, zero when not requested.
    pub fn get(&self, kind: ResourceKind) -> u64 {
        self.0.get(&kind).copied().unwrap_or(0)
    }

    /// Iterate over `(dimension, amount)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, u64)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    /// Whether no dimension is requested.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Add `other` into `self`, saturating.
    pub fn accumulate(&mut self, other: &Self) {
        for (kind, amount) in other.iter() {
            let entry = self.0.entry(kind).or_insert(0);
            *entry = entry.saturating_add(amount);
        }
    }
}

impl FromIterator<(ResourceKind, u64)> for ResourceRequirements {
    fn from_iter<I: IntoIterator<Item = (ResourceKind, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What to run and what it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Human-readable name.
    pub name: String,
    /// Image reference passed to the runtime.
    pub image: String,
    /// Entrypoint/command override; empty keeps the image default.
    #[serde(default)]
    pub command: Vec<String>,
    /// Declared resource requirements.
    pub resources: ResourceRequirements,
    /// Scheduling priority.
    #[serde(default)]
    pub priority: Priority,
}

impl TaskDescriptor {
    /// Descriptor with the given image, no command override, normal priority.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command: Vec::new(),
            resources: ResourceRequirements::new(),
            priority: Priority::Normal,
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the resource requirements.
    #[must_use]
    pub fn with_resources(mut self, resources: ResourceRequirements) -> Self {
        self.resources = resources;
        self
    }

    /// Set the command override.
    #[must_use]
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Check the closed set of descriptor rules.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.image.trim().is_empty() {
            return Err(SchedulerError::Validation("image reference is required".into()));
        }
        if self.image.chars().any(char::is_whitespace) {
            return Err(SchedulerError::Validation(format!(
                "image reference `{}` contains whitespace",
                self.image
            )));
        }
        if self.resources.is_empty() {
            return Err(SchedulerError::Validation(
                "at least one resource requirement is required".into(),
            ));
        }
        if let Some((kind, _)) = self.resources.iter().find(|(_, amount)| *amount == 0) {
            return Err(SchedulerError::Validation(format!(
                "resource request for {kind} must be positive"
            )));
        }
        Ok(())
    }
}

/// Weak linkage to a runtime container: a lookup key into the driver's namespace,
/// never an owner of the container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerRef(String);

impl ContainerRef {
    /// Wrap a runtime container identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One orchestrated workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Immutable identifier.
    pub id: TaskId,
    /// What to run.
    pub descriptor: TaskDescriptor,
    /// Set iff `state` is Running or Paused.
    pub container: Option<ContainerRef>,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Submission time, milliseconds since epoch.
    pub created_at_ms: u128,
    /// Time of the last state change, milliseconds since epoch.
    pub last_transition_at_ms: u128,
    /// Monotonic submission order; breaks `created_at_ms` ties.
    pub seq: u64,
    /// Transient-failure retries consumed.
    pub retry_count: u32,
    /// Last recorded failure, kept for inspection.
    pub last_error: Option<String>,
}

impl Task {
    /// Fresh PENDING task.
    pub fn new(id: TaskId, descriptor: TaskDescriptor, seq: u64, now_ms: u128) -> Self {
        Self {
            id,
            descriptor,
            container: None,
            state: TaskState::Pending,
            created_at_ms: now_ms,
            last_transition_at_ms: now_ms,
            seq,
            retry_count: 0,
            last_error: None,
        }
    }

    /// Priority shortcut.
    pub const fn priority(&self) -> Priority {
        self.descriptor.priority
    }

    /// Whether the container-linkage invariant holds.
    pub const fn linkage_consistent(&self) -> bool {
        self.container.is_some() == self.state.holds_container()
    }

    /// Read-only view for API layers.
    pub fn view(&self) -> TaskView {
        TaskView {
            id: self.id,
            name: self.descriptor.name.clone(),
            image: self.descriptor.image.clone(),
            state: self.state,
            priority: self.descriptor.priority,
            resources: self.descriptor.resources.clone(),
            container: self.container.clone(),
            created_at_ms: self.created_at_ms,
            last_transition_at_ms: self.last_transition_at_ms,
            retry_count: self.retry_count,
            last_error: self.last_error.clone(),
        }
    }
}

/// Snapshot of a task handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskView {
    /// Task identifier.
    pub id: TaskId,
    /// Task name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Lifecycle state.
    pub state: TaskState,
    /// Priority.
    pub priority: Priority,
    /// Declared resources.
    pub resources: ResourceRequirements,
    /// Container linkage, if any.
    pub container: Option<ContainerRef>,
    /// Submission time.
    pub created_at_ms: u128,
    /// Last transition time.
    pub last_transition_at_ms: u128,
    /// Retries consumed.
    pub retry_count: u32,
    /// Last recorded failure.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> TaskDescriptor {
        TaskDescriptor::new("web", "nginx:latest")
            .with_resources(ResourceRequirements::new().with_cpu_shares(512))
    }

    #[test]
    fn test_valid_descriptor() {
        assert!(descriptor().validate().is_ok());
    }

    #[test]
    fn test_missing_image_rejected() {
        let mut d = descriptor();
        d.image = "  ".into();
        assert!(matches!(d.validate(), Err(SchedulerError::Validation(_))));
    }

    #[test]
    fn test_zero_request_rejected() {
        let d = descriptor().with_resources(ResourceRequirements::new().with_cpu_shares(0));
        assert!(matches!(d.validate(), Err(SchedulerError::Validation(_))));
    }

    #[test]
    fn test_empty_requirements_rejected() {
        let d = descriptor().with_resources(ResourceRequirements::new());
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_memory_strings() {
        let r = ResourceRequirements::new()
            .with_memory("1g")
            .unwrap()
            .with_memory_swap("2048m")
            .unwrap();
        assert_eq!(r.get(ResourceKind::Memory), 1 << 30);
        assert_eq!(r.get(ResourceKind::MemorySwap), 2 << 30);
        assert!(ResourceRequirements::new().with_memory("lots").is_err());
    }

    #[test]
    fn test_new_task_has_no_linkage() {
        let task = Task::new(uuid::Uuid::new_v4(), descriptor(), 0, 10);
        assert_eq!(task.state, TaskState::Pending);
        assert!(task.linkage_consistent());
    }
}
