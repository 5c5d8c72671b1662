//! In-memory executor and archive store for exercising the lifecycle
//! controller without any cloud backend.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::archive::Archive;
use crate::contract::{SyncOutcome, SyncRequest};
use crate::error::{Result, SyncError};
use crate::executor::{ExecutorBackend, SyncExecutor};
use crate::state::SyncLifecycleState;
use crate::store::{ArchiveStore, StoredArchiveRef};

/// Executor that records every request and replays scripted outcomes.
/// Once the script is exhausted every call succeeds.
#[derive(Clone, Default)]
pub struct RecordingExecutor {
    inner: Arc<RecordingInner>,
}

#[derive(Default)]
struct RecordingInner {
    outcomes: Mutex<VecDeque<SyncOutcome>>,
    requests: Mutex<Vec<SyncRequest>>,
    abandoned: Mutex<Vec<SyncRequest>>,
    delay: Mutex<Option<Duration>>,
    max_archive_bytes: Mutex<Option<u64>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_outcome(&self, outcome: SyncOutcome) {
        self.inner
            .outcomes
            .lock()
            .expect("poisoned mutex")
            .push_back(outcome);
    }

    pub fn fail_next(&self, detail: &str) {
        self.push_outcome(SyncOutcome::failed(detail));
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.inner.delay.lock().expect("poisoned mutex") = Some(delay);
        self
    }

    pub fn with_capacity_limit(self, max_archive_bytes: u64) -> Self {
        *self.inner.max_archive_bytes.lock().expect("poisoned mutex") = Some(max_archive_bytes);
        self
    }

    pub fn requests(&self) -> Vec<SyncRequest> {
        self.inner.requests.lock().expect("poisoned mutex").clone()
    }

    pub fn call_count(&self) -> usize {
        self.inner.requests.lock().expect("poisoned mutex").len()
    }

    /// Requests whose call was dropped by the controller before it finished.
    pub fn abandoned(&self) -> Vec<SyncRequest> {
        self.inner.abandoned.lock().expect("poisoned mutex").clone()
    }
}

#[async_trait]
impl SyncExecutor for RecordingExecutor {
    fn backend(&self) -> ExecutorBackend {
        ExecutorBackend::Function
    }

    fn check_capacity(&self, archive_bytes: u64) -> Result<()> {
        match *self.inner.max_archive_bytes.lock().expect("poisoned mutex") {
            Some(limit) if archive_bytes > limit => Err(SyncError::CapacityExceeded {
                size: archive_bytes,
                limit,
            }),
            _ => Ok(()),
        }
    }

    async fn execute(&self, request: &SyncRequest) -> SyncOutcome {
        self.inner
            .requests
            .lock()
            .expect("poisoned mutex")
            .push(request.clone());

        let delay = *self.inner.delay.lock().expect("poisoned mutex");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.inner
            .outcomes
            .lock()
            .expect("poisoned mutex")
            .pop_front()
            .unwrap_or_else(SyncOutcome::succeeded)
    }

    async fn abandon(&self, request: &SyncRequest) {
        self.inner
            .abandoned
            .lock()
            .expect("poisoned mutex")
            .push(request.clone());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub bucket: String,
    pub key: String,
    pub fingerprint: String,
    pub bytes: usize,
}

/// Archive store that keeps uploads in memory.
#[derive(Clone, Default)]
pub struct MemoryArchiveStore {
    uploads: Arc<Mutex<Vec<RecordedUpload>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every following upload fails with `message`.
    pub fn fail_uploads(&self, message: &str) {
        *self.failure.lock().expect("poisoned mutex") = Some(message.to_string());
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().expect("poisoned mutex").clone()
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchiveStore {
    async fn upload(&self, archive: &Archive, bucket: &str) -> Result<StoredArchiveRef> {
        if let Some(message) = self.failure.lock().expect("poisoned mutex").clone() {
            return Err(SyncError::Upload {
                bucket: bucket.to_string(),
                key: archive.stored_key.clone(),
                message,
            });
        }

        self.uploads
            .lock()
            .expect("poisoned mutex")
            .push(RecordedUpload {
                bucket: bucket.to_string(),
                key: archive.stored_key.clone(),
                fingerprint: archive.fingerprint.clone(),
                bytes: archive.blob.len(),
            });
        Ok(StoredArchiveRef {
            key: archive.stored_key.clone(),
            fingerprint: archive.fingerprint.clone(),
        })
    }
}

pub fn sample_state(bucket: &str, fingerprint: &str) -> SyncLifecycleState {
    SyncLifecycleState {
        bucket: bucket.to_string(),
        archive_key: crate::storage_keys::STAGING_ARCHIVE_KEY.to_string(),
        archive_fingerprint: fingerprint.to_string(),
        object_acl: None,
        executor_handle: "handle-1".to_string(),
    }
}
