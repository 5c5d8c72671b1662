//! Durable record of the last successfully applied sync, per spec name.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{Result, SyncError};
use crate::storage_keys::state_file_stem;

pub const STATE_RECORD_SCHEMA_VERSION: &str = "v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncLifecycleState {
    pub bucket: String,
    pub archive_key: String,
    pub archive_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_acl: Option<String>,
    pub executor_handle: String,
}

/// Held for the duration of one lifecycle transition.
#[derive(Debug)]
pub struct TransitionLock {
    file: Option<File>,
}

impl TransitionLock {
    pub fn unlocked() -> Self {
        Self { file: None }
    }
}

impl Drop for TransitionLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}

pub trait StateStore: Send + Sync {
    fn load(&self, spec_name: &str) -> Result<Option<SyncLifecycleState>>;
    fn save(&self, spec_name: &str, state: &SyncLifecycleState) -> Result<()>;
    fn remove(&self, spec_name: &str) -> Result<()>;

    /// Guards a read-modify-write of one spec's record against concurrent
    /// transitions.
    fn lock(&self, _spec_name: &str) -> Result<TransitionLock> {
        Ok(TransitionLock::unlocked())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StateRecord {
    schema_version: String,
    written_at: DateTime<Utc>,
    state: SyncLifecycleState,
}

/// One JSON document per spec under a directory, replaced atomically.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, spec_name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", state_file_stem(spec_name)))
    }

    fn lock_path(&self, spec_name: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", state_file_stem(spec_name)))
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|error| SyncError::io(&self.dir, error))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, spec_name: &str) -> Result<Option<SyncLifecycleState>> {
        let path = self.record_path(spec_name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(SyncError::io(path, error)),
        };

        let record: StateRecord = serde_json::from_str(&content).map_err(|error| {
            SyncError::State(format!("corrupted record '{}': {error}", path.display()))
        })?;
        if record.schema_version != STATE_RECORD_SCHEMA_VERSION {
            return Err(SyncError::State(format!(
                "record '{}' has unsupported schema version '{}'",
                path.display(),
                record.schema_version
            )));
        }
        Ok(Some(record.state))
    }

    fn save(&self, spec_name: &str, state: &SyncLifecycleState) -> Result<()> {
        self.ensure_dir()?;
        let path = self.record_path(spec_name);
        let record = StateRecord {
            schema_version: STATE_RECORD_SCHEMA_VERSION.to_string(),
            written_at: Utc::now(),
            state: state.clone(),
        };
        let body = serde_json::to_vec_pretty(&record)
            .map_err(|error| SyncError::State(format!("failed to encode record: {error}")))?;

        let mut staged =
            NamedTempFile::new_in(&self.dir).map_err(|error| SyncError::io(&self.dir, error))?;
        staged
            .write_all(&body)
            .and_then(|_| staged.as_file().sync_all())
            .map_err(|error| SyncError::io(staged.path().to_path_buf(), error))?;
        staged
            .persist(&path)
            .map_err(|error| SyncError::io(&path, error.error))?;

        tracing::debug!(spec = spec_name, path = %path.display(), "saved lifecycle state");
        Ok(())
    }

    fn remove(&self, spec_name: &str) -> Result<()> {
        let path = self.record_path(spec_name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(SyncError::io(path, error)),
        }
    }

    fn lock(&self, spec_name: &str) -> Result<TransitionLock> {
        self.ensure_dir()?;
        let path = self.lock_path(spec_name);
        let file = File::create(&path).map_err(|error| SyncError::io(&path, error))?;
        file.try_lock_exclusive().map_err(|_| {
            SyncError::State(format!(
                "another transition for '{spec_name}' is in progress (lock '{}')",
                path.display()
            ))
        })?;
        Ok(TransitionLock { file: Some(file) })
    }
}

/// Process-local store. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    records: Arc<Mutex<HashMap<String, SyncLifecycleState>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(spec_name: &str, state: SyncLifecycleState) -> Self {
        let store = Self::new();
        if let Ok(mut records) = store.records.lock() {
            records.insert(spec_name.to_string(), state);
        }
        store
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, SyncLifecycleState>>> {
        self.records
            .lock()
            .map_err(|_| SyncError::State("state store mutex poisoned".to_string()))
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, spec_name: &str) -> Result<Option<SyncLifecycleState>> {
        Ok(self.records()?.get(spec_name).cloned())
    }

    fn save(&self, spec_name: &str, state: &SyncLifecycleState) -> Result<()> {
        self.records()?.insert(spec_name.to_string(), state.clone());
        Ok(())
    }

    fn remove(&self, spec_name: &str) -> Result<()> {
        self.records()?.remove(spec_name);
        Ok(())
    }
}
