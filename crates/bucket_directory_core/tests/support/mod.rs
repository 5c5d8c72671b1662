#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bucket_directory_core::config::TaskBackendConfig;
use bucket_directory_core::executor::{StoppedTask, TaskExecutor, TaskLaunch, TaskRunner};
use bucket_directory_core::lifecycle::SyncController;
use bucket_directory_core::state::{MemoryStateStore, StateStore};
use bucket_directory_core::strategy::{SyncSpec, SyncStrategy};
use bucket_directory_core::test_helpers::{MemoryArchiveStore, RecordingExecutor};
use tempfile::TempDir;

pub const TEST_BUCKET: &str = "test-bucket";
pub const SPEC_NAME: &str = "site";

/// Writes `files` (relative path, content) under `root`, creating parents.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (relative, content) in files {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, content).expect("write fixture file");
    }
}

pub fn spec_for(source: &Path, bucket: &str, object_acl: Option<&str>) -> SyncSpec {
    SyncSpec {
        name: SPEC_NAME.to_string(),
        source_directory: source.to_path_buf(),
        bucket: bucket.to_string(),
        object_acl: object_acl.map(str::to_string),
        strategy: SyncStrategy::FunctionBackend,
    }
}

/// Source directory plus shared in-memory collaborators. The state store and
/// recorders are shared across controllers built from the same harness, so
/// successive runs see each other's effects.
pub struct Harness {
    pub source: TempDir,
    pub executor: RecordingExecutor,
    pub archives: MemoryArchiveStore,
    pub states: Arc<dyn StateStore>,
    pub executor_timeout: Duration,
}

impl Harness {
    pub fn new(files: &[(&str, &str)]) -> Self {
        Self::with_states(files, Arc::new(MemoryStateStore::new()))
    }

    pub fn with_states(files: &[(&str, &str)], states: Arc<dyn StateStore>) -> Self {
        let source = TempDir::new().expect("source tempdir");
        write_tree(source.path(), files);
        Self {
            source,
            executor: RecordingExecutor::new(),
            archives: MemoryArchiveStore::new(),
            states,
            executor_timeout: Duration::from_secs(5),
        }
    }

    pub fn source_path(&self) -> PathBuf {
        self.source.path().to_path_buf()
    }

    pub fn controller(&self, bucket: &str, object_acl: Option<&str>) -> SyncController {
        SyncController::new(
            spec_for(self.source.path(), bucket, object_acl),
            Arc::new(self.archives.clone()),
            Arc::new(self.executor.clone()),
            Arc::clone(&self.states),
        )
        .with_executor_timeout(self.executor_timeout)
    }

    /// Controller backed by the task executor instead of the recording one.
    pub fn task_controller(&self, bucket: &str, runner: SlowTaskRunner) -> SyncController {
        SyncController::new(
            spec_for(self.source.path(), bucket, None),
            Arc::new(self.archives.clone()),
            Arc::new(TaskExecutor::new(runner, task_backend())),
            Arc::clone(&self.states),
        )
        .with_executor_timeout(self.executor_timeout)
    }
}

pub fn task_backend() -> TaskBackendConfig {
    TaskBackendConfig {
        cluster: "sync-cluster".to_string(),
        task_definition: "sync-task:1".to_string(),
        container_name: "container".to_string(),
        subnets: vec!["subnet-1".to_string()],
        security_groups: vec!["sg-1".to_string()],
        assign_public_ip: false,
        poll_interval_secs: 1,
    }
}

/// Task runner whose tasks take `wait` to stop on their own. Launches are
/// numbered `task-1`, `task-2`, ... and explicit stops are recorded.
#[derive(Clone)]
pub struct SlowTaskRunner {
    wait: Duration,
    launched: Arc<Mutex<Vec<String>>>,
    stopped: Arc<Mutex<Vec<String>>>,
}

impl SlowTaskRunner {
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            launched: Arc::new(Mutex::new(Vec::new())),
            stopped: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().expect("poisoned mutex").clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().expect("poisoned mutex").clone()
    }
}

#[async_trait]
impl TaskRunner for SlowTaskRunner {
    async fn run_task(&self, _launch: &TaskLaunch) -> Result<Vec<String>, String> {
        let mut launched = self.launched.lock().expect("poisoned mutex");
        let arn = format!("task-{}", launched.len() + 1);
        launched.push(arn.clone());
        Ok(vec![arn])
    }

    async fn wait_until_stopped(
        &self,
        _cluster: &str,
        task_arns: &[String],
    ) -> Result<Vec<StoppedTask>, String> {
        tokio::time::sleep(self.wait).await;
        Ok(task_arns
            .iter()
            .map(|arn| StoppedTask {
                task_arn: arn.clone(),
                exit_code: Some(0),
                stopped_reason: None,
            })
            .collect())
    }

    async fn stop_tasks(
        &self,
        _cluster: &str,
        task_arns: &[String],
        _reason: &str,
    ) -> Result<(), String> {
        self.stopped
            .lock()
            .expect("poisoned mutex")
            .extend(task_arns.iter().cloned());
        Ok(())
    }
}
