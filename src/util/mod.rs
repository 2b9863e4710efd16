//! Shared utilities: clock, identifiers and enums, telemetry, unit parsing.

pub mod clock;
pub mod serde;
pub mod telemetry;
pub mod units;

pub use self::clock::now_ms;
pub use self::serde::{Priority, ResourceKind, TaskId};
pub use self::telemetry::{init_tracing, init_tracing_with};
pub use self::units::parse_memory;
