//! Create / Update / Delete state machine for one directory-to-bucket binding.
//!
//! ```text
//! Absent --create--> Synced --update--> Synced
//!                    Synced --delete--> Absent
//! ```
//!
//! The persisted [`SyncLifecycleState`] always reflects the last transition
//! whose executor outcome was successful. A failed transition returns the
//! error and leaves the record exactly as it was.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::archive::{Archive, ArchiveBuilder};
use crate::config::DEFAULT_EXECUTOR_TIMEOUT_SECS;
use crate::contract::{SyncAction, SyncOutcome, SyncRequest};
use crate::error::{Result, SyncError};
use crate::executor::SyncExecutor;
use crate::state::{StateStore, SyncLifecycleState};
use crate::store::{ArchiveStore, StoredArchiveRef};
use crate::strategy::SyncSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Created,
    Updated,
    /// Content and ACL match the record; nothing was uploaded or executed.
    Unchanged,
    /// The bucket changed: the old bucket was emptied and the new one created.
    Replaced,
    Deleted,
    AlreadyAbsent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionReport {
    pub transition: Transition,
    /// Record after the transition; `None` once the binding is absent.
    pub state: Option<SyncLifecycleState>,
}

impl TransitionReport {
    fn new(transition: Transition, state: Option<SyncLifecycleState>) -> Self {
        Self { transition, state }
    }
}

pub struct SyncController {
    spec: SyncSpec,
    builder: ArchiveBuilder,
    archives: Arc<dyn ArchiveStore>,
    executor: Arc<dyn SyncExecutor>,
    states: Arc<dyn StateStore>,
    executor_timeout: Duration,
    cancel: CancellationToken,
}

impl SyncController {
    pub fn new(
        spec: SyncSpec,
        archives: Arc<dyn ArchiveStore>,
        executor: Arc<dyn SyncExecutor>,
        states: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            spec,
            builder: ArchiveBuilder::default(),
            archives,
            executor,
            states,
            executor_timeout: Duration::from_secs(DEFAULT_EXECUTOR_TIMEOUT_SECS),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_archive_builder(mut self, builder: ArchiveBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_executor_timeout(mut self, timeout: Duration) -> Self {
        self.executor_timeout = timeout;
        self
    }

    /// Cancelling the token fails the in-flight executor call instead of
    /// leaving the transition half-done.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn spec(&self) -> &SyncSpec {
        &self.spec
    }

    pub fn current_state(&self) -> Result<Option<SyncLifecycleState>> {
        self.states.load(&self.spec.name)
    }

    /// Brings the bucket in line with the directory: Create when no record
    /// exists, otherwise an Update that is skipped if nothing changed.
    #[tracing::instrument(skip(self), fields(spec = %self.spec.name, bucket = %self.spec.bucket))]
    pub async fn reconcile(&self) -> Result<TransitionReport> {
        let _lock = self.states.lock(&self.spec.name)?;
        match self.states.load(&self.spec.name)? {
            None => {
                let archive = self.build_archive().await?;
                self.create_from(archive).await
            }
            Some(previous) if previous.bucket != self.spec.bucket => {
                self.replace(previous).await
            }
            Some(previous) => self.update_from(previous).await,
        }
    }

    #[tracing::instrument(skip(self), fields(spec = %self.spec.name, bucket = %self.spec.bucket))]
    pub async fn create(&self) -> Result<TransitionReport> {
        let _lock = self.states.lock(&self.spec.name)?;
        if self.states.load(&self.spec.name)?.is_some() {
            return Err(SyncError::State(format!(
                "'{}' is already synced; reconcile or delete it instead",
                self.spec.name
            )));
        }
        let archive = self.build_archive().await?;
        self.create_from(archive).await
    }

    #[tracing::instrument(skip(self), fields(spec = %self.spec.name, bucket = %self.spec.bucket))]
    pub async fn update(&self) -> Result<TransitionReport> {
        let _lock = self.states.lock(&self.spec.name)?;
        let previous = self.states.load(&self.spec.name)?.ok_or_else(|| {
            SyncError::State(format!("'{}' has not been created yet", self.spec.name))
        })?;
        if previous.bucket != self.spec.bucket {
            return self.replace(previous).await;
        }
        self.update_from(previous).await
    }

    /// Removes everything synced for this spec. Deleting an absent binding
    /// succeeds without contacting the executor.
    #[tracing::instrument(skip(self), fields(spec = %self.spec.name))]
    pub async fn delete(&self) -> Result<TransitionReport> {
        let _lock = self.states.lock(&self.spec.name)?;
        match self.states.load(&self.spec.name)? {
            None => {
                tracing::info!("nothing recorded; delete is a no-op");
                Ok(TransitionReport::new(Transition::AlreadyAbsent, None))
            }
            Some(previous) => self.delete_from(previous).await,
        }
    }

    async fn create_from(&self, archive: Archive) -> Result<TransitionReport> {
        let stored = self.stage(&archive).await?;
        let request = SyncRequest::new(
            SyncAction::Create,
            &self.spec.bucket,
            &stored.key,
            self.spec.object_acl.clone(),
        );
        self.run(&request).await?;

        let state = SyncLifecycleState {
            bucket: self.spec.bucket.clone(),
            archive_key: stored.key,
            archive_fingerprint: stored.fingerprint,
            object_acl: self.spec.object_acl.clone(),
            executor_handle: Uuid::new_v4().to_string(),
        };
        self.states.save(&self.spec.name, &state)?;
        tracing::info!(fingerprint = %state.archive_fingerprint, "created");
        Ok(TransitionReport::new(Transition::Created, Some(state)))
    }

    async fn update_from(&self, previous: SyncLifecycleState) -> Result<TransitionReport> {
        let archive = self.build_archive().await?;
        let acl_changed = previous.object_acl != self.spec.object_acl;
        if archive.fingerprint == previous.archive_fingerprint && !acl_changed {
            tracing::info!(fingerprint = %archive.fingerprint, "unchanged; skipping update");
            return Ok(TransitionReport::new(Transition::Unchanged, Some(previous)));
        }

        let stored = self.stage(&archive).await?;
        let request = SyncRequest::new(
            SyncAction::Update,
            &self.spec.bucket,
            &stored.key,
            self.spec.object_acl.clone(),
        );
        self.run(&request).await?;

        let state = SyncLifecycleState {
            bucket: self.spec.bucket.clone(),
            archive_key: stored.key,
            archive_fingerprint: stored.fingerprint,
            object_acl: self.spec.object_acl.clone(),
            executor_handle: previous.executor_handle,
        };
        self.states.save(&self.spec.name, &state)?;
        tracing::info!(
            previous_fingerprint = %previous.archive_fingerprint,
            fingerprint = %state.archive_fingerprint,
            acl_changed,
            "updated"
        );
        Ok(TransitionReport::new(Transition::Updated, Some(state)))
    }

    async fn delete_from(&self, previous: SyncLifecycleState) -> Result<TransitionReport> {
        let request = SyncRequest::new(
            SyncAction::Delete,
            &previous.bucket,
            &previous.archive_key,
            previous.object_acl.clone(),
        );
        self.run(&request).await?;
        self.states.remove(&self.spec.name)?;
        tracing::info!(bucket = %previous.bucket, "deleted");
        Ok(TransitionReport::new(Transition::Deleted, None))
    }

    async fn replace(&self, previous: SyncLifecycleState) -> Result<TransitionReport> {
        tracing::info!(
            previous_bucket = %previous.bucket,
            "bucket changed; replacing"
        );
        // Validate the new archive before touching the old bucket.
        let archive = self.build_archive().await?;
        self.executor.check_capacity(archive.size())?;

        self.delete_from(previous).await?;
        let report = self.create_from(archive).await?;
        Ok(TransitionReport::new(Transition::Replaced, report.state))
    }

    async fn build_archive(&self) -> Result<Archive> {
        let builder = self.builder.clone();
        let source = self.spec.source_directory.clone();
        tokio::task::spawn_blocking(move || builder.build(&source))
            .await
            .map_err(|error| SyncError::Archive(format!("archive build task failed: {error}")))?
    }

    async fn stage(&self, archive: &Archive) -> Result<StoredArchiveRef> {
        self.executor.check_capacity(archive.size())?;
        let stored = self.archives.upload(archive, &self.spec.bucket).await?;
        if stored.fingerprint != archive.fingerprint {
            return Err(SyncError::Upload {
                bucket: self.spec.bucket.clone(),
                key: stored.key,
                message: format!(
                    "store reported fingerprint {} but the archive is {}",
                    stored.fingerprint, archive.fingerprint
                ),
            });
        }
        tracing::debug!(key = %stored.key, bytes = archive.size(), "staged archive");
        Ok(stored)
    }

    async fn run(&self, request: &SyncRequest) -> Result<()> {
        let started_at = Instant::now();
        let executed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SyncOutcome::failed(
                "transition cancelled before the executor finished",
            )),
            finished = tokio::time::timeout(self.executor_timeout, self.executor.execute(request)) => {
                finished.map_err(|_| {
                    SyncOutcome::failed(format!(
                        "{} executor did not finish within {:?}",
                        self.executor.backend(),
                        self.executor_timeout
                    ))
                })
            }
        };
        let outcome = match executed {
            Ok(outcome) => outcome,
            Err(outcome) => {
                // The dropped call may have left remote work running.
                self.executor.abandon(request).await;
                outcome
            }
        };

        let elapsed_ms = started_at.elapsed().as_millis();
        match outcome.into_result(request) {
            Ok(()) => {
                tracing::info!(
                    action = %request.action,
                    backend = %self.executor.backend(),
                    archive_key = %request.archive_key,
                    duration_ms = elapsed_ms,
                    "executor finished"
                );
                Ok(())
            }
            Err(error) => {
                if error.remote_state_uncertain() {
                    tracing::warn!(
                        action = %request.action,
                        archive_key = %request.archive_key,
                        duration_ms = elapsed_ms,
                        "executor failed; bucket content may partially reflect the attempted change: {error}"
                    );
                } else {
                    tracing::error!(
                        action = %request.action,
                        archive_key = %request.archive_key,
                        duration_ms = elapsed_ms,
                        "executor failed: {error}"
                    );
                }
                Err(error)
            }
        }
    }
}
