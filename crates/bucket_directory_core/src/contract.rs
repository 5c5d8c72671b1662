use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// ACL the task backend applies when none is configured.
pub const DEFAULT_TASK_OBJECT_ACL: &str = "private";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncAction {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Create" => Ok(Self::Create),
            "Update" => Ok(Self::Update),
            "Delete" => Ok(Self::Delete),
            other => Err(SyncError::config(format!("Unknown action type '{other}'"))),
        }
    }
}

/// Payload handed to a sync executor. Field names match the wire format the
/// remote backends read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct SyncRequest {
    pub action: SyncAction,
    pub bucket: String,
    pub archive_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_acl: Option<String>,
}

impl SyncRequest {
    pub fn new(
        action: SyncAction,
        bucket: impl Into<String>,
        archive_key: impl Into<String>,
        object_acl: Option<String>,
    ) -> Self {
        Self {
            action,
            bucket: bucket.into(),
            archive_key: archive_key.into(),
            object_acl,
        }
    }

    /// Positional form `[Action, Bucket, ArchiveKey, ObjectAcl]`; the ACL is
    /// omitted when unset.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            self.action.to_string(),
            self.bucket.clone(),
            self.archive_key.clone(),
        ];
        if let Some(acl) = &self.object_acl {
            args.push(acl.clone());
        }
        args
    }

    pub fn from_command_args(args: &[String]) -> Result<Self, SyncError> {
        match args {
            [action, bucket, archive_key, rest @ ..] if rest.len() <= 1 => {
                if bucket.trim().is_empty() {
                    return Err(SyncError::config("bucket argument cannot be empty"));
                }
                if archive_key.trim().is_empty() {
                    return Err(SyncError::config("archive key argument cannot be empty"));
                }
                Ok(Self {
                    action: action.parse()?,
                    bucket: bucket.clone(),
                    archive_key: archive_key.clone(),
                    object_acl: rest.first().filter(|acl| !acl.is_empty()).cloned(),
                })
            }
            _ => Err(SyncError::config(format!(
                "expected arguments [Action, Bucket, ArchiveKey, ObjectAcl?], got {} argument(s)",
                args.len()
            ))),
        }
    }
}

/// Result of a single executor invocation. Only used to decide whether a
/// lifecycle transition may commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl SyncOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            error_detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            error_detail: Some(detail.into()),
        }
    }

    pub fn into_result(self, request: &SyncRequest) -> Result<(), SyncError> {
        if self.success {
            return Ok(());
        }
        Err(SyncError::Execution {
            action: request.action,
            bucket: request.bucket.clone(),
            archive_key: request.archive_key.clone(),
            detail: self
                .error_detail
                .unwrap_or_else(|| "executor reported failure without detail".to_string()),
        })
    }
}
