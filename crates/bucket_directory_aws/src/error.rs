use std::path::PathBuf;

use bucket_directory_core::error::SyncError;
use thiserror::Error;

/// Failures while expanding an archive into a bucket or emptying it.
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("archive s3://{bucket}/{key} was not readable after {attempts} attempts")]
    ArchiveUnavailable {
        bucket: String,
        key: String,
        attempts: u32,
    },

    #[error("archive entry '{0}' would escape the extraction directory")]
    UnsafeEntry(String),

    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    #[error("IO error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bucket operation on s3://{bucket} failed: {message}")]
    Bucket { bucket: String, message: String },

    #[error(transparent)]
    Request(#[from] SyncError),
}

impl ApplyError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn bucket(bucket: &str, message: impl Into<String>) -> Self {
        Self::Bucket {
            bucket: bucket.to_string(),
            message: message.into(),
        }
    }
}
