//! Wires a configured directory to the sync path its strategy selects.

use std::sync::Arc;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use bucket_directory_core::archive::ArchiveBuilder;
use bucket_directory_core::config::SyncConfig;
use bucket_directory_core::error::{Result, SyncError};
use bucket_directory_core::executor::{
    ExecutorBackend, FunctionExecutor, SyncExecutor, TaskExecutor,
};
use bucket_directory_core::lifecycle::{SyncController, TransitionReport};
use bucket_directory_core::state::{FileStateStore, StateStore, SyncLifecycleState};
use bucket_directory_core::strategy::{select_sync_path, SyncPath, SyncSpec};
use tokio_util::sync::CancellationToken;

use crate::adapters::ecs::AwsEcsTaskRunner;
use crate::adapters::lambda::AwsLambdaInvoker;
use crate::adapters::object_store::{BucketArchiveStore, S3Bucket};
use crate::handlers::direct::{copy_directory, CliSync};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryOutcome {
    Lifecycle(TransitionReport),
    Copied { objects: usize },
    CliSynced,
    /// Stateless strategies have nothing recorded to delete.
    NothingToDelete,
}

pub struct DirectorySyncer {
    config: SyncConfig,
    s3_client: aws_sdk_s3::Client,
    lambda_client: aws_sdk_lambda::Client,
    ecs_client: aws_sdk_ecs::Client,
    states: Arc<dyn StateStore>,
    cancel: CancellationToken,
}

/// Loads shared AWS configuration once, pinned to the configured region when
/// one is set.
pub async fn load_aws_config(region: Option<&str>) -> SdkConfig {
    let loader = aws_config::defaults(BehaviorVersion::latest());
    match region {
        Some(region) => loader.region(Region::new(region.to_string())).load().await,
        None => loader.load().await,
    }
}

impl DirectorySyncer {
    pub fn new(config: SyncConfig, aws_config: &SdkConfig) -> Self {
        let states: Arc<dyn StateStore> = Arc::new(FileStateStore::new(config.state_dir.clone()));
        Self {
            s3_client: aws_sdk_s3::Client::new(aws_config),
            lambda_client: aws_sdk_lambda::Client::new(aws_config),
            ecs_client: aws_sdk_ecs::Client::new(aws_config),
            states,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_state_store(mut self, states: Arc<dyn StateStore>) -> Self {
        self.states = states;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn sync(&self, spec: &SyncSpec) -> Result<DirectoryOutcome> {
        match select_sync_path(spec.strategy) {
            SyncPath::Lifecycle(backend) => self
                .controller(spec, backend)?
                .reconcile()
                .await
                .map(DirectoryOutcome::Lifecycle),
            SyncPath::LocalCli => {
                CliSync::new(self.config.region.clone()).sync(spec).await?;
                Ok(DirectoryOutcome::CliSynced)
            }
            SyncPath::LocalCopy => {
                let objects = copy_directory(&S3Bucket::new(self.s3_client.clone()), spec).await?;
                Ok(DirectoryOutcome::Copied { objects })
            }
        }
    }

    pub async fn delete(&self, spec: &SyncSpec) -> Result<DirectoryOutcome> {
        match select_sync_path(spec.strategy) {
            SyncPath::Lifecycle(backend) => self
                .controller(spec, backend)?
                .delete()
                .await
                .map(DirectoryOutcome::Lifecycle),
            SyncPath::LocalCli | SyncPath::LocalCopy => {
                tracing::info!(spec = %spec.name, "stateless strategy; nothing to delete");
                Ok(DirectoryOutcome::NothingToDelete)
            }
        }
    }

    pub fn status(&self, spec: &SyncSpec) -> Result<Option<SyncLifecycleState>> {
        self.states.load(&spec.name)
    }

    fn controller(&self, spec: &SyncSpec, backend: ExecutorBackend) -> Result<SyncController> {
        Ok(SyncController::new(
            spec.clone(),
            Arc::new(BucketArchiveStore::new(S3Bucket::new(self.s3_client.clone()))),
            self.executor(backend)?,
            Arc::clone(&self.states),
        )
        .with_archive_builder(ArchiveBuilder::new(self.config.staging_key.clone()))
        .with_executor_timeout(self.config.executor_timeout())
        .with_cancellation(self.cancel.clone()))
    }

    fn executor(&self, backend: ExecutorBackend) -> Result<Arc<dyn SyncExecutor>> {
        match backend {
            ExecutorBackend::Function => {
                let function = self.config.function.clone().ok_or_else(|| {
                    SyncError::config("function strategy requires a [function] section")
                })?;
                Ok(Arc::new(FunctionExecutor::new(
                    AwsLambdaInvoker::new(self.lambda_client.clone()),
                    function,
                )))
            }
            ExecutorBackend::Task => {
                let task = self.config.task.clone().ok_or_else(|| {
                    SyncError::config("task strategy requires a [task] section")
                })?;
                let runner = AwsEcsTaskRunner::new(self.ecs_client.clone(), task.poll_interval());
                Ok(Arc::new(TaskExecutor::new(runner, task)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bucket_directory_core::state::MemoryStateStore;
    use bucket_directory_core::test_helpers::sample_state;

    use super::*;

    fn offline_aws_config() -> SdkConfig {
        SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build()
    }

    fn config() -> SyncConfig {
        SyncConfig::from_toml_str(
            r#"
            [function]
            function_name = "sync-fn"

            [[directories]]
            name = "site"
            source = "/srv/site"
            bucket = "site-bucket"

            [[directories]]
            name = "assets"
            source = "/srv/assets"
            bucket = "assets-bucket"
            strategy = "local-copy"
            "#,
        )
        .expect("valid config")
    }

    #[tokio::test]
    async fn stateless_delete_reports_nothing_to_delete() {
        let config = config();
        let spec = config.spec("assets").expect("assets spec");
        let syncer = DirectorySyncer::new(config, &offline_aws_config());

        let outcome = syncer.delete(&spec).await.expect("delete");

        assert_eq!(outcome, DirectoryOutcome::NothingToDelete);
    }

    #[tokio::test]
    async fn lifecycle_delete_without_record_is_already_absent() {
        let config = config();
        let spec = config.spec("site").expect("site spec");
        let syncer = DirectorySyncer::new(config, &offline_aws_config())
            .with_state_store(Arc::new(MemoryStateStore::new()));

        let outcome = syncer.delete(&spec).await.expect("delete");

        match outcome {
            DirectoryOutcome::Lifecycle(report) => assert!(report.state.is_none()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn status_reads_recorded_state() {
        let config = config();
        let spec = config.spec("site").expect("site spec");
        let states = MemoryStateStore::with_state("site", sample_state("site-bucket", "abc"));
        let syncer =
            DirectorySyncer::new(config, &offline_aws_config()).with_state_store(Arc::new(states));

        let state = syncer.status(&spec).expect("status").expect("recorded");
        assert_eq!(state.archive_fingerprint, "abc");
    }

    #[test]
    fn task_strategy_without_task_section_is_invalid() {
        let syncer = DirectorySyncer::new(config(), &offline_aws_config());
        let error = syncer
            .executor(ExecutorBackend::Task)
            .err()
            .expect("missing task config");
        assert!(error.is_pre_remote());
    }
}
