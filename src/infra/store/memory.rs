//! In-memory state store.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::SchedulerError;
use crate::infra::store::{StateSnapshot, StateStore};

/// Store that keeps the last snapshot in memory. Clones share it.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    snapshot: Arc<Mutex<Option<StateSnapshot>>>,
}

impl InMemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last saved snapshot.
    pub fn snapshot(&self) -> Option<StateSnapshot> {
        self.snapshot.lock().clone()
    }
}

impl StateStore for InMemoryStore {
    fn load(&self) -> Result<Option<StateSnapshot>, SchedulerError> {
        Ok(self.snapshot.lock().clone())
    }

    fn save(&self, snapshot: &StateSnapshot) -> Result<(), SchedulerError> {
        *self.snapshot.lock() = Some(snapshot.clone());
        Ok(())
    }
}
