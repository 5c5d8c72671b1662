#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bucket_directory_aws::adapters::object_store::{BucketArchiveStore, MemoryBucket};
use bucket_directory_aws::handlers::apply::{apply, ApplyConfig};
use bucket_directory_core::contract::{SyncOutcome, SyncRequest};
use bucket_directory_core::executor::{ExecutorBackend, SyncExecutor};
use bucket_directory_core::lifecycle::SyncController;
use bucket_directory_core::state::MemoryStateStore;
use bucket_directory_core::strategy::{SyncSpec, SyncStrategy};

/// Runs the apply handler in-process against a shared in-memory bucket, the
/// way the sync function would remotely.
#[derive(Clone)]
pub struct InProcessExecutor {
    objects: MemoryBucket,
    requests: Arc<Mutex<Vec<SyncRequest>>>,
}

impl InProcessExecutor {
    pub fn new(objects: MemoryBucket) -> Self {
        Self {
            objects,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().expect("poisoned mutex").clone()
    }
}

#[async_trait]
impl SyncExecutor for InProcessExecutor {
    fn backend(&self) -> ExecutorBackend {
        ExecutorBackend::Function
    }

    async fn execute(&self, request: &SyncRequest) -> SyncOutcome {
        self.requests
            .lock()
            .expect("poisoned mutex")
            .push(request.clone());
        let config = ApplyConfig {
            archive_wait_attempts: 2,
            archive_wait_interval: Duration::from_millis(1),
        };
        match apply(&self.objects, request, &config).await {
            Ok(_) => SyncOutcome::succeeded(),
            Err(error) => SyncOutcome::failed(error.to_string()),
        }
    }
}

pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (relative, content) in files {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, content).expect("write fixture file");
    }
}

pub fn controller(
    source: &Path,
    bucket: &str,
    objects: &MemoryBucket,
    executor: &InProcessExecutor,
    states: &MemoryStateStore,
) -> SyncController {
    let spec = SyncSpec {
        name: "site".to_string(),
        source_directory: source.to_path_buf(),
        bucket: bucket.to_string(),
        object_acl: None,
        strategy: SyncStrategy::FunctionBackend,
    };
    SyncController::new(
        spec,
        Arc::new(BucketArchiveStore::new(objects.clone())),
        Arc::new(executor.clone()),
        Arc::new(states.clone()),
    )
}
