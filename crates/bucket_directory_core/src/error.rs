//! Error taxonomy for directory synchronization.

use std::path::PathBuf;

use thiserror::Error;

use crate::contract::SyncAction;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Upload of s3://{bucket}/{key} failed: {message}")]
    Upload {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("Archive of {size} bytes exceeds the {limit} byte limit of the function backend")]
    CapacityExceeded { size: u64, limit: u64 },

    #[error("{action} of s3://{bucket} (archive '{archive_key}') failed: {detail}")]
    Execution {
        action: SyncAction,
        bucket: String,
        archive_key: String,
        detail: String,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Lifecycle state error: {0}")]
    State(String),
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Errors raised before anything was written to the bucket or any
    /// backend was invoked.
    pub fn is_pre_remote(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded { .. } | Self::InvalidConfiguration(_)
        )
    }

    /// A failed Update or Delete may have partially applied on the remote
    /// side, so the bucket can match neither the old nor the new content.
    pub fn remote_state_uncertain(&self) -> bool {
        matches!(
            self,
            Self::Execution {
                action: SyncAction::Update | SyncAction::Delete,
                ..
            }
        )
    }
}
