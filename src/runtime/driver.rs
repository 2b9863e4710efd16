//! Container runtime capability consumed by the scheduler.
//!
//! The scheduler never talks to a concrete runtime. Anything that can pull an image and
//! create/start/stop/pause/unpause/remove/inspect a container can sit behind
//! [`RuntimeDriver`]; [`crate::runtime::SimulatedDriver`] is the in-process one used by
//! tests and benchmarks.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::task::{ContainerRef, ResourceRequirements};

/// Failure reported by a driver call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// Retryable failure (network hiccup, pull timeout).
    #[error("transient: {0}")]
    Transient(String),
    /// Non-retryable failure (bad image reference, rejected descriptor).
    #[error("fatal: {0}")]
    Fatal(String),
    /// The container does not exist.
    #[error("container not found: {0}")]
    NotFound(String),
}

impl DriverError {
    /// Whether retrying the same call may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Observed container status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    /// Created but not started.
    Created,
    /// Running.
    Running,
    /// Frozen.
    Paused,
    /// Process exited with `code`.
    Exited {
        /// Exit code.
        code: i64,
    },
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Exited { code } => write!(f, "exited({code})"),
        }
    }
}

/// Everything the runtime needs to create a container for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name (`task_<id>`).
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Command override; empty keeps the image default.
    pub command: Vec<String>,
    /// Limits to apply to the container.
    pub resources: ResourceRequirements,
}

/// Abstract container runtime.
#[async_trait]
pub trait RuntimeDriver: Send + Sync + 'static {
    /// Make sure `image` is present locally, pulling it if needed.
    async fn ensure_image(&self, image: &str) -> Result<(), DriverError>;

    /// Create (but do not start) a container.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerRef, DriverError>;

    /// Start a created container.
    async fn start(&self, id: &ContainerRef) -> Result<(), DriverError>;

    /// Stop a container, waiting up to `timeout` before killing it.
    /// A zero timeout is a forced stop.
    async fn stop(&self, id: &ContainerRef, timeout: Duration) -> Result<(), DriverError>;

    /// Freeze a running container.
    async fn pause(&self, id: &ContainerRef) -> Result<(), DriverError>;

    /// Thaw a paused container.
    async fn unpause(&self, id: &ContainerRef) -> Result<(), DriverError>;

    /// Remove a container.
    async fn remove(&self, id: &ContainerRef) -> Result<(), DriverError>;

    /// Report container status, or `DriverError::NotFound`.
    async fn inspect(&self, id: &ContainerRef) -> Result<ContainerStatus, DriverError>;
}
