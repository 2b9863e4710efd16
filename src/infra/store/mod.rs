//! Persisted scheduler state: a snapshot of the registry plus checkpoint records.

pub mod file;
pub mod memory;

use serde::{Deserialize, Serialize};

use crate::core::checkpoint::CheckpointRecord;
use crate::core::task::Task;
use crate::core::SchedulerError;
use crate::util::clock::now_ms;

pub use file::JsonFileStore;
pub use memory::InMemoryStore;

/// Snapshot format version written by this crate.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to rebuild in-memory scheduler state after restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Format version.
    pub version: u32,
    /// Write time, milliseconds since epoch.
    pub saved_at_ms: u128,
    /// Every registered task.
    pub tasks: Vec<Task>,
    /// Every retained checkpoint record.
    #[serde(default)]
    pub checkpoints: Vec<CheckpointRecord>,
}

impl StateSnapshot {
    /// Snapshot stamped with the current time.
    pub fn new(tasks: Vec<Task>, checkpoints: Vec<CheckpointRecord>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at_ms: now_ms(),
            tasks,
            checkpoints,
        }
    }
}

/// Durable storage for [`StateSnapshot`]s.
pub trait StateStore: Send + Sync {
    /// Latest saved snapshot, `None` when nothing was saved yet.
    fn load(&self) -> Result<Option<StateSnapshot>, SchedulerError>;

    /// Replace the saved snapshot.
    fn save(&self, snapshot: &StateSnapshot) -> Result<(), SchedulerError>;
}
