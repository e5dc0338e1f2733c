//! State store: a single JSON file holding every `AgentRecord`, guarded by
//! an OS advisory lock for the full read-modify-write window so concurrent
//! supervisor processes (and external writers respecting the ownership
//! split) never interleave a write.
//!
//! Follows a "one connection type owns the file, every operation goes
//! through it" shape over a locked JSON file rather than a SQL database.
//!
//! The file's external contract is `{ "agents": [AgentRecord, …] }` — an
//! envelope, not a bare id-keyed map — so observers (another CLI
//! invocation, a GUI) can parse it without knowing this store's internal
//! representation. In memory the records live in a `HashMap` keyed by id
//! for O(1) lookup; `StateFile` is only the on-disk shape.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};

use fs4::FileExt;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::models::agent_record::AgentRecord;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to acquire lock on state store: {0}")]
    LockFailed(std::io::Error),
    #[error("failed to read state store file: {0}")]
    ReadFailed(std::io::Error),
    #[error("failed to parse state store contents: {0}")]
    ParseFailed(#[from] serde_json::Error),
    #[error("failed to write state store file: {0}")]
    WriteFailed(std::io::Error),
    #[error("agent record '{0}' not found")]
    NotFound(String),
    #[error("agent record '{0}' already registered")]
    AlreadyRegistered(String),
    #[error("failed to set up state store watcher: {0}")]
    WatchFailed(#[from] notify::Error),
    #[error("background task panicked: {0}")]
    TaskJoinFailed(#[from] tokio::task::JoinError),
}

/// In-memory representation: a flat map keyed by agent id.
type StateMap = HashMap<String, AgentRecord>;

/// On-disk envelope: the external contract is a named `agents` array, not a
/// bare id-keyed object, so an observer can parse the file without reverse
/// engineering this store's internal map.
#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    agents: Vec<AgentRecord>,
}

/// Cross-process-safe store for `AgentRecord`s, backed by one JSON file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl StateStore {
    /// `path` is the state file itself; the lock file is `path` with a
    /// `.lock` extension appended so the data file's own bytes are never
    /// used as the lock target (locking the file you're rewriting via
    /// temp-file-plus-rename would lock a file that's about to be replaced).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self { path, lock_path: PathBuf::from(lock_path) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register a brand new record. Fails if one with the same id already exists.
    pub async fn register(&self, record: AgentRecord) -> Result<(), StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_locked_state(|state| {
                if state.contains_key(&record.id) {
                    return Err(StoreError::AlreadyRegistered(record.id.clone()));
                }
                state.insert(record.id.clone(), record);
                Ok(())
            })
        })
        .await?
    }

    pub async fn get(&self, id: &str) -> Result<Option<AgentRecord>, StoreError> {
        let store = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let state = store.read_state()?;
            Ok(state.get(&id).cloned())
        })
        .await?
    }

    pub async fn list(&self) -> Result<Vec<AgentRecord>, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let state = store.read_state()?;
            let mut records: Vec<AgentRecord> = state.into_values().collect();
            records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
            Ok(records)
        })
        .await?
    }

    /// Full supervisor-owned overwrite of an existing record.
    pub async fn update(&self, record: AgentRecord) -> Result<(), StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_locked_state(|state| {
                if !state.contains_key(&record.id) {
                    return Err(StoreError::NotFound(record.id.clone()));
                }
                state.insert(record.id.clone(), record);
                Ok(())
            })
        })
        .await?
    }

    /// Merge only the externally-writable fields of `incoming` into the
    /// stored record, leaving supervisor-owned fields untouched. Used for
    /// writes an external process (another CLI invocation, a GUI) makes to
    /// a running agent's record.
    pub async fn merge_update(&self, incoming: AgentRecord) -> Result<(), StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_locked_state(|state| {
                let existing = state.get_mut(&incoming.id).ok_or_else(|| StoreError::NotFound(incoming.id.clone()))?;
                existing.apply_external_fields(&incoming);
                Ok(())
            })
        })
        .await?
    }

    pub async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let store = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            store.with_locked_state(|state| {
                if state.remove(&id).is_none() {
                    return Err(StoreError::NotFound(id.clone()));
                }
                Ok(())
            })
        })
        .await?
    }

    /// Watch the state store file for external changes, returning a
    /// channel of raw file-system events. The watcher itself must be kept
    /// alive by the caller for as long as the channel is read.
    pub fn watch(&self) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<notify::Event>), StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        })?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(StoreError::WriteFailed)?;
        }
        if !self.path.exists() {
            fs::write(&self.path, br#"{"agents":[]}"#).map_err(StoreError::WriteFailed)?;
        }
        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;
        Ok((watcher, rx))
    }

    /// Open (creating if absent) and exclusively lock the lock file for the
    /// duration of `f`, which reads, mutates, and persists state. The lock
    /// is held for the entire window; `fs4`'s OS advisory lock is released
    /// when `lock_file` drops at the end of this function.
    fn with_locked_state<T>(&self, f: impl FnOnce(&mut StateMap) -> Result<T, StoreError>) -> Result<T, StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(StoreError::WriteFailed)?;
        }
        let lock_file = File::create(&self.lock_path).map_err(StoreError::LockFailed)?;
        lock_file.lock_exclusive().map_err(StoreError::LockFailed)?;

        let mut state = self.read_state_unlocked()?;
        let result = f(&mut state)?;
        self.write_state_unlocked(&state)?;

        lock_file.unlock().map_err(StoreError::LockFailed)?;
        Ok(result)
    }

    /// Read-only snapshot, taken under a shared lock so it can't observe a
    /// torn write from another process mid-rename.
    fn read_state(&self) -> Result<StateMap, StoreError> {
        if !self.path.exists() {
            return Ok(StateMap::new());
        }
        let lock_file = File::create(&self.lock_path).map_err(StoreError::LockFailed)?;
        lock_file.lock_shared().map_err(StoreError::LockFailed)?;
        let state = self.read_state_unlocked()?;
        lock_file.unlock().map_err(StoreError::LockFailed)?;
        Ok(state)
    }

    fn read_state_unlocked(&self) -> Result<StateMap, StoreError> {
        if !self.path.exists() {
            return Ok(StateMap::new());
        }
        let mut contents = String::new();
        File::open(&self.path).map_err(StoreError::ReadFailed)?.read_to_string(&mut contents).map_err(StoreError::ReadFailed)?;
        if contents.trim().is_empty() {
            return Ok(StateMap::new());
        }
        let file: StateFile = serde_json::from_str(&contents)?;
        Ok(file.agents.into_iter().map(|record| (record.id.clone(), record)).collect())
    }

    /// Write via a sibling temp file, then atomically rename it over the
    /// real path, so a reader never observes a partially-written file.
    /// Agents are sorted by id before serializing so two writes of an
    /// unchanged map produce byte-identical output regardless of the
    /// `HashMap`'s iteration order.
    fn write_state_unlocked(&self, state: &StateMap) -> Result<(), StoreError> {
        let mut agents: Vec<AgentRecord> = state.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        let payload = serde_json::to_vec_pretty(&StateFile { agents })?;
        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let mut tmp_file = File::create(&tmp_path).map_err(StoreError::WriteFailed)?;
        tmp_file.write_all(&payload).map_err(StoreError::WriteFailed)?;
        tmp_file.sync_all().map_err(StoreError::WriteFailed)?;
        fs::rename(&tmp_path, &self.path).map_err(StoreError::WriteFailed)?;
        Ok(())
    }
}
