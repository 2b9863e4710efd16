//! Infrastructure adapters for the pending queue and state storage.

pub mod queue;
pub mod store;

pub use queue::{InMemoryQueue, QueueEntry};
pub use store::{InMemoryStore, JsonFileStore, StateSnapshot, StateStore};
