//! # Prometheus Orchestrator
//!
//! Priority- and resource-aware scheduling engine for containerized tasks.
//!
//! The crate sits between a management API and a container runtime. The runtime is
//! consumed through the [`runtime::RuntimeDriver`] trait; everything the runtime does
//! not provide natively lives here:
//!
//! - **Resource accounting**: per-dimension capacity (CPU shares, memory, swap, GPU
//!   VRAM) with atomic all-or-nothing reservations that never over-commit
//! - **Task lifecycle**: a central transition table; illegal transitions are rejected,
//!   never coerced
//! - **Admission and preemption**: CRITICAL/HIGH tasks evict the minimal set of
//!   strictly-lower-priority running tasks back to PENDING
//! - **Checkpoints**: pause/resume with a retain-or-release reservation policy
//! - **Control loop**: rebalances the pending queue in priority then FIFO order,
//!   reconciles exited containers and reaps old terminal tasks
//! - **Persistence**: JSON snapshots that restore the registry after restart
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_orchestrator::config::{PoolConfig, SchedulerConfig};
//! use prometheus_orchestrator::core::{ResourceRequirements, Scheduler, TaskDescriptor};
//! use prometheus_orchestrator::runtime::SimulatedDriver;
//! use prometheus_orchestrator::util::serde::{Priority, ResourceKind};
//!
//! let config = SchedulerConfig::new().with_pool(PoolConfig::new([(ResourceKind::Cpu, 4096)]));
//! let scheduler = Scheduler::new(config, Arc::new(SimulatedDriver::new()))?;
//!
//! let id = scheduler.submit(
//!     TaskDescriptor::new("web", "nginx:1.25")
//!         .with_priority(Priority::High)
//!         .with_resources(ResourceRequirements::new().with_cpu_shares(1024)),
//! )?;
//! scheduler.start(id).await?;
//! scheduler.pause(id).await?;
//! scheduler.resume(id).await?;
//!
//! scheduler.scheduler_start()?;
//! // ...
//! scheduler.shutdown().await;
//! ```
//!
//! For complete scenarios see the integration tests under `tests/`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling engine.
pub mod core;
/// Configuration models for the pool and the scheduler loop.
pub mod config;
/// Builders to construct a scheduler from configuration.
pub mod builders;
/// Infrastructure adapters for the pending queue and state storage.
pub mod infra;
/// Runtime driver seam and API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
