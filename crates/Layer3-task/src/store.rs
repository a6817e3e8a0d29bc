//! Task persistence
//!
//! `TaskManager` only talks to the [`TaskStore`] trait. `JsonTaskStore` keeps one
//! `<id>.json` file per task and replaces it atomically on every save.

use crate::task::{Task, TaskId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::warn;
use warden_foundation::{Error, JsonStore, Result};

/// Task record repository
pub trait TaskStore: Send + Sync {
    fn save(&self, task: &Task) -> Result<()>;

    fn load(&self, id: TaskId) -> Result<Option<Task>>;

    fn load_all(&self) -> Result<Vec<Task>>;

    fn remove(&self, id: TaskId) -> Result<()>;
}

// ============================================================================
// JSON files
// ============================================================================

pub struct JsonTaskStore {
    store: JsonStore,
}

impl JsonTaskStore {
    /// Records live in `<data_dir>/tasks/`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::new(data_dir.into().join("tasks")),
        }
    }

    pub fn dir(&self) -> &std::path::Path {
        self.store.base_dir()
    }

    fn filename(id: TaskId) -> String {
        format!("{}.json", id)
    }
}

impl TaskStore for JsonTaskStore {
    fn save(&self, task: &Task) -> Result<()> {
        self.store.save_atomic(&Self::filename(task.id), task)
    }

    fn load(&self, id: TaskId) -> Result<Option<Task>> {
        self.store.load_optional(&Self::filename(id))
    }

    fn load_all(&self) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        for name in self.store.list("json")? {
            match self.store.load::<Task>(&name) {
                Ok(task) => tasks.push(task),
                // A record that cannot be parsed is left on disk untouched
                Err(e) => warn!(file = %name, error = %e, "Skipping unreadable task record"),
            }
        }
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    fn remove(&self, id: TaskId) -> Result<()> {
        self.store.remove(&Self::filename(id))
    }
}

// ============================================================================
// In memory
// ============================================================================

/// In-memory store. `set_fail_writes(true)` makes every save fail.
#[derive(Default)]
pub struct MemoryTaskStore {
    records: Mutex<HashMap<TaskId, Task>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful saves so far
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Seed a record directly, bypassing the failure switch
    pub fn insert(&self, task: Task) {
        self.records.lock().insert(task.id, task);
    }
}

impl TaskStore for MemoryTaskStore {
    fn save(&self, task: &Task) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Persistence(format!(
                "write of task {} rejected",
                task.id
            )));
        }
        self.records.lock().insert(task.id, task.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self, id: TaskId) -> Result<Option<Task>> {
        Ok(self.records.lock().get(&id).cloned())
    }

    fn load_all(&self) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self.records.lock().values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    fn remove(&self, id: TaskId) -> Result<()> {
        self.records.lock().remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TaskAction;
    use tempfile::tempdir;

    #[test]
    fn test_json_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = JsonTaskStore::new(dir.path());

        let mut task = Task::new("delete temp.txt", vec![]);
        store.save(&task).unwrap();
        task.apply(TaskAction::Start, 10).unwrap();
        store.save(&task).unwrap();

        let loaded = store.load(task.id).unwrap().unwrap();
        assert_eq!(loaded, task);
        assert_eq!(store.load_all().unwrap().len(), 1);

        // no temp files left behind
        let names: Vec<_> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![format!("{}.json", task.id)]);

        store.remove(task.id).unwrap();
        assert!(store.load(task.id).unwrap().is_none());
    }

    #[test]
    fn test_json_store_skips_corrupt_records() {
        let dir = tempdir().unwrap();
        let store = JsonTaskStore::new(dir.path());
        let task = Task::new("ok", vec![]);
        store.save(&task).unwrap();
        std::fs::write(store.dir().join("broken.json"), "{ not json").unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, task.id);
    }

    #[test]
    fn test_memory_store_fail_writes() {
        let store = MemoryTaskStore::new();
        let task = Task::new("x", vec![]);

        store.set_fail_writes(true);
        let err = store.save(&task).unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert!(store.is_empty());

        store.set_fail_writes(false);
        store.save(&task).unwrap();
        assert_eq!(store.writes(), 1);
        assert_eq!(store.len(), 1);
    }
}
