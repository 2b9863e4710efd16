//! Core scheduling engine: lifecycle, accounting, admission, checkpoints, and the loop.

pub mod admission;
pub mod audit;
pub mod checkpoint;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod resource_pool;
pub mod scheduler;
pub mod task;

pub use admission::{AdmissionController, AdmissionDecision};
pub use audit::{build_audit_event, AuditEvent, AuditSink, InMemoryAuditSink};
pub use checkpoint::{CheckpointManager, CheckpointRecord, PauseOutcome, ResumeAttempt};
pub use error::{AppResult, SchedulerError};
pub use lifecycle::{transition, TaskEvent, TaskState};
pub use registry::{Applied, Linkage, TaskRegistry};
pub use resource_pool::{DimensionUsage, ResourcePool, Shortfall};
pub use scheduler::{
    AdmissionOutcome, RebalanceReport, ResumeOutcome, Scheduler, SchedulerState, SystemStatus,
    TaskUpdate,
};
pub use task::{ContainerRef, ResourceRequirements, Task, TaskDescriptor, TaskView};
