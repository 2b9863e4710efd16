//! File-backed state store writing one JSON document.

use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::core::SchedulerError;
use crate::infra::store::{StateSnapshot, StateStore, SNAPSHOT_VERSION};

const STATE_FILE: &str = "tasks_state.json";

/// JSON snapshot under a state directory.
///
/// Writes go to a sibling temp file first and are renamed into place, so a crash
/// mid-write leaves the previous snapshot intact.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Store rooted at `dir`, created if missing.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let dir = dir.as_ref();
        create_dir_all(dir).map_err(|e| {
            SchedulerError::Persistence(format!("creating {}: {e}", dir.display()))
        })?;
        Ok(Self {
            path: dir.join(STATE_FILE),
            write_lock: Mutex::new(()),
        })
    }

    /// Snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<Option<StateSnapshot>, SchedulerError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| SchedulerError::Persistence(format!("reading {}: {e}", self.path.display())))?;
        let snapshot: StateSnapshot = serde_json::from_str(&raw)
            .map_err(|e| SchedulerError::Persistence(format!("decoding {}: {e}", self.path.display())))?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(SchedulerError::Persistence(format!(
                "snapshot version {} is newer than supported {SNAPSHOT_VERSION}",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &StateSnapshot) -> Result<(), SchedulerError> {
        let body = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| SchedulerError::Persistence(e.to_string()))?;
        let _guard = self.write_lock.lock();
        let tmp = self.tmp_path();
        fs::write(&tmp, body)
            .map_err(|e| SchedulerError::Persistence(format!("writing {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| SchedulerError::Persistence(format!("renaming into {}: {e}", self.path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("orchestrator-store-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_missing_file_loads_none() {
        let dir = scratch_dir();
        let store = JsonFileStore::new(&dir).unwrap();
        assert!(store.load().unwrap().is_none());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_save_then_load() {
        let dir = scratch_dir();
        let store = JsonFileStore::new(&dir).unwrap();
        let snapshot = StateSnapshot::new(vec![], vec![]);
        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), Some(snapshot));
        assert!(!store.tmp_path().exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_corrupt_file_is_a_persistence_error() {
        let dir = scratch_dir();
        let store = JsonFileStore::new(&dir).unwrap();
        fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.load(), Err(SchedulerError::Persistence(_))));
        let _ = fs::remove_dir_all(dir);
    }
}
