use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::config::TaskBackendConfig;
use crate::contract::{SyncOutcome, SyncRequest, DEFAULT_TASK_OBJECT_ACL};

use super::{ExecutorBackend, SyncExecutor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLaunch {
    pub cluster: String,
    pub task_definition: String,
    pub container_name: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub assign_public_ip: bool,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedTask {
    pub task_arn: String,
    pub exit_code: Option<i32>,
    pub stopped_reason: Option<String>,
}

impl StoppedTask {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Launches container tasks on a cluster and waits for them to stop.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Returns the ARNs of the started tasks.
    async fn run_task(&self, launch: &TaskLaunch) -> Result<Vec<String>, String>;

    async fn wait_until_stopped(
        &self,
        cluster: &str,
        task_arns: &[String],
    ) -> Result<Vec<StoppedTask>, String>;

    async fn stop_tasks(
        &self,
        cluster: &str,
        task_arns: &[String],
        reason: &str,
    ) -> Result<(), String>;
}

/// Reason attached to tasks stopped because their sync was abandoned.
pub const ABANDONED_TASK_REASON: &str = "bucket-directory sync abandoned";

pub struct TaskExecutor<R> {
    runner: R,
    config: TaskBackendConfig,
    /// Launched but not yet observed as stopped, keyed by bucket.
    in_flight: Mutex<HashMap<String, Vec<String>>>,
}

impl<R: TaskRunner> TaskExecutor<R> {
    pub fn new(runner: R, config: TaskBackendConfig) -> Self {
        Self {
            runner,
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<String, Vec<String>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn launch_for(&self, request: &SyncRequest) -> TaskLaunch {
        let mut request = request.clone();
        if request.object_acl.is_none() {
            request.object_acl = Some(DEFAULT_TASK_OBJECT_ACL.to_string());
        }

        TaskLaunch {
            cluster: self.config.cluster.clone(),
            task_definition: self.config.task_definition.clone(),
            container_name: self.config.container_name.clone(),
            subnets: self.config.subnets.clone(),
            security_groups: self.config.security_groups.clone(),
            assign_public_ip: self.config.assign_public_ip,
            command: request.command_args(),
        }
    }
}

#[async_trait]
impl<R: TaskRunner> SyncExecutor for TaskExecutor<R> {
    fn backend(&self) -> ExecutorBackend {
        ExecutorBackend::Task
    }

    async fn execute(&self, request: &SyncRequest) -> SyncOutcome {
        let launch = self.launch_for(request);
        let task_definition = &launch.task_definition;

        tracing::info!(
            cluster = %launch.cluster,
            task_definition = %task_definition,
            action = %request.action,
            bucket = %request.bucket,
            "launching sync task"
        );

        let task_arns = match self.runner.run_task(&launch).await {
            Ok(arns) if !arns.is_empty() => arns,
            Ok(_) => {
                return SyncOutcome::failed(format!(
                    "Invoking task '{task_definition}' failed: cluster started no tasks"
                ))
            }
            Err(error) => {
                return SyncOutcome::failed(format!(
                    "Invoking task '{task_definition}' failed: {error}"
                ))
            }
        };

        self.in_flight().insert(request.bucket.clone(), task_arns.clone());
        let waited = self
            .runner
            .wait_until_stopped(&launch.cluster, &task_arns)
            .await;
        self.in_flight().remove(&request.bucket);

        let stopped = match waited {
            Ok(stopped) => stopped,
            Err(error) => {
                return SyncOutcome::failed(format!(
                    "Waiting for task '{task_definition}' failed: {error}"
                ))
            }
        };

        // Task logs are not fetched; a failure only says which task to look at.
        match stopped.iter().find(|task| !task.succeeded()) {
            Some(task) => SyncOutcome::failed(format!(
                "Task '{}' of '{task_definition}' stopped unsuccessfully (exit code {}, reason: {})",
                task.task_arn,
                task.exit_code
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                task.stopped_reason.as_deref().unwrap_or("none reported"),
            )),
            None if stopped.len() < task_arns.len() => SyncOutcome::failed(format!(
                "Waiting for task '{task_definition}' returned {} of {} tasks",
                stopped.len(),
                task_arns.len()
            )),
            None => SyncOutcome::succeeded(),
        }
    }

    async fn abandon(&self, request: &SyncRequest) {
        let launched = self.in_flight().remove(&request.bucket);
        let Some(task_arns) = launched else {
            return;
        };

        tracing::warn!(
            cluster = %self.config.cluster,
            bucket = %request.bucket,
            tasks = task_arns.len(),
            "stopping abandoned sync tasks"
        );
        if let Err(error) = self
            .runner
            .stop_tasks(&self.config.cluster, &task_arns, ABANDONED_TASK_REASON)
            .await
        {
            tracing::error!(
                cluster = %self.config.cluster,
                bucket = %request.bucket,
                "failed to stop abandoned sync tasks {task_arns:?}: {error}"
            );
        }
    }
}
