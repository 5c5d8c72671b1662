use async_trait::async_trait;

use crate::archive::Archive;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArchiveRef {
    pub key: String,
    /// Fingerprint as reported by the store; the fingerprint of record.
    pub fingerprint: String,
}

/// Stages archives in the target bucket. Uploading identical bytes to the
/// same key again must be harmless.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn upload(&self, archive: &Archive, bucket: &str) -> Result<StoredArchiveRef>;
}
