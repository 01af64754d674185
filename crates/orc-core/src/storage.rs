//! Per-task persistence for tasks, plans and execution states.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::plan::Plan;
use crate::state::State;
use crate::types::Task;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Task,
    Plan,
    State,
}

impl RecordKind {
    fn file_name(self) -> &'static str {
        match self {
            RecordKind::Task => "task.json",
            RecordKind::Plan => "plan.json",
            RecordKind::State => "state.json",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordKind::Task => "task",
            RecordKind::Plan => "plan",
            RecordKind::State => "state",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{kind} not found for task '{task_id}'")]
    NotFound { kind: RecordKind, task_id: String },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid task id '{0}'")]
    InvalidTaskId(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Reject ids that could escape the task directory.
pub fn validate_task_id(task_id: &str) -> Result<(), StorageError> {
    let bad = task_id.is_empty()
        || task_id == "."
        || task_id.contains("..")
        || task_id.contains(['/', '\\', '\0']);
    if bad {
        return Err(StorageError::InvalidTaskId(task_id.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Durable storage for the three per-task records.
///
/// Saves are atomic per record and a load after a save observes it.
/// Failures propagate to the caller unchanged; nothing is retried here.
pub trait PersistenceBackend: Send + Sync {
    fn load_task(&self, task_id: &str) -> Result<Task, StorageError>;
    fn save_task(&self, task: &Task) -> Result<(), StorageError>;

    fn load_plan(&self, task_id: &str) -> Result<Plan, StorageError>;
    fn save_plan(&self, plan: &Plan) -> Result<(), StorageError>;

    fn load_state(&self, task_id: &str) -> Result<State, StorageError>;
    fn save_state(&self, state: &State) -> Result<(), StorageError>;

    /// Every task id with at least one stored record, sorted.
    fn list_task_ids(&self) -> Result<Vec<String>, StorageError>;
}

// ---------------------------------------------------------------------------
// FileBackend
// ---------------------------------------------------------------------------

/// Pretty JSON files under `<root>/tasks/<task-id>/`.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    fn record_path(&self, task_id: &str, kind: RecordKind) -> Result<PathBuf, StorageError> {
        validate_task_id(task_id)?;
        Ok(self.tasks_dir().join(task_id).join(kind.file_name()))
    }

    fn load<T: DeserializeOwned>(&self, task_id: &str, kind: RecordKind) -> Result<T, StorageError> {
        let path = self.record_path(task_id, kind)?;
        let data = match fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    kind,
                    task_id: task_id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&data)?)
    }

    fn save<T: Serialize>(&self, task_id: &str, kind: RecordKind, value: &T) -> Result<(), StorageError> {
        let path = self.record_path(task_id, kind)?;
        let json = serde_json::to_string_pretty(value)?;
        atomic_write(&path, json.as_bytes()).inspect_err(|e| {
            tracing::warn!(task_id, %kind, error = %e, "failed to persist record");
        })?;
        tracing::debug!(task_id, %kind, path = %path.display(), "record saved");
        Ok(())
    }
}

/// Write to a sibling temp file, fsync, then rename over `path`.
fn atomic_write(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "record path has no parent"))?;
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = dir.join(format!(".{file_name}.{}.tmp", std::process::id()));

    let result = (|| -> io::Result<()> {
        let mut file = File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    // Persist the rename itself. Not every platform can open a directory.
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
    Ok(())
}

impl PersistenceBackend for FileBackend {
    fn load_task(&self, task_id: &str) -> Result<Task, StorageError> {
        self.load(task_id, RecordKind::Task)
    }

    fn save_task(&self, task: &Task) -> Result<(), StorageError> {
        self.save(&task.id, RecordKind::Task, task)
    }

    fn load_plan(&self, task_id: &str) -> Result<Plan, StorageError> {
        self.load(task_id, RecordKind::Plan)
    }

    fn save_plan(&self, plan: &Plan) -> Result<(), StorageError> {
        self.save(&plan.task_id, RecordKind::Plan, plan)
    }

    fn load_state(&self, task_id: &str) -> Result<State, StorageError> {
        self.load(task_id, RecordKind::State)
    }

    fn save_state(&self, state: &State) -> Result<(), StorageError> {
        self.save(&state.task_id, RecordKind::State, state)
    }

    fn list_task_ids(&self) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(self.tasks_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str() {
                if validate_task_id(id).is_ok() {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

/// Process-local backend. Records are cloned in and out.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tasks: RwLock<HashMap<String, Task>>,
    plans: RwLock<HashMap<String, Plan>>,
    states: RwLock<HashMap<String, State>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn mem_load<T: Clone>(
    map: &RwLock<HashMap<String, T>>,
    task_id: &str,
    kind: RecordKind,
) -> Result<T, StorageError> {
    validate_task_id(task_id)?;
    let guard = map.read().unwrap_or_else(PoisonError::into_inner);
    guard.get(task_id).cloned().ok_or_else(|| StorageError::NotFound {
        kind,
        task_id: task_id.to_string(),
    })
}

fn mem_save<T: Clone>(
    map: &RwLock<HashMap<String, T>>,
    task_id: &str,
    value: &T,
) -> Result<(), StorageError> {
    validate_task_id(task_id)?;
    let mut guard = map.write().unwrap_or_else(PoisonError::into_inner);
    guard.insert(task_id.to_string(), value.clone());
    Ok(())
}

fn mem_keys<T>(map: &RwLock<HashMap<String, T>>, into: &mut BTreeSet<String>) {
    let guard = map.read().unwrap_or_else(PoisonError::into_inner);
    into.extend(guard.keys().cloned());
}

impl PersistenceBackend for MemoryBackend {
    fn load_task(&self, task_id: &str) -> Result<Task, StorageError> {
        mem_load(&self.tasks, task_id, RecordKind::Task)
    }

    fn save_task(&self, task: &Task) -> Result<(), StorageError> {
        mem_save(&self.tasks, &task.id, task)
    }

    fn load_plan(&self, task_id: &str) -> Result<Plan, StorageError> {
        mem_load(&self.plans, task_id, RecordKind::Plan)
    }

    fn save_plan(&self, plan: &Plan) -> Result<(), StorageError> {
        mem_save(&self.plans, &plan.task_id, plan)
    }

    fn load_state(&self, task_id: &str) -> Result<State, StorageError> {
        mem_load(&self.states, task_id, RecordKind::State)
    }

    fn save_state(&self, state: &State) -> Result<(), StorageError> {
        mem_save(&self.states, &state.task_id, state)
    }

    fn list_task_ids(&self) -> Result<Vec<String>, StorageError> {
        let mut ids = BTreeSet::new();
        mem_keys(&self.tasks, &mut ids);
        mem_keys(&self.plans, &mut ids);
        mem_keys(&self.states, &mut ids);
        Ok(ids.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
