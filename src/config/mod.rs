//! Configuration models for the resource pool and the scheduler loop.

pub mod pool;

pub use pool::{PausePolicy, PoolConfig, SchedulerConfig};
