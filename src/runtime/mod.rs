//! Runtime driver seam and the API surface consumed by outer layers.

pub mod api;
pub mod driver;
pub mod simulated;

pub use api::{health, submit_task, Health, TaskSubmission};
pub use driver::{ContainerSpec, ContainerStatus, DriverError, RuntimeDriver};
pub use simulated::{DriverOp, SimulatedDriver};
