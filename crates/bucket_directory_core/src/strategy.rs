use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::executor::ExecutorBackend;

/// How a directory reaches its bucket.
///
/// Switching strategies for an existing binding leaves the bucket empty until
/// the new strategy has run once.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub enum SyncStrategy {
    /// Upload one archive and let a function next to the bucket expand it.
    #[default]
    FunctionBackend,
    /// Upload one archive and let a container task expand it.
    TaskBackend,
    /// Run `aws s3 sync` locally.
    LocalCli,
    /// Upload every file as its own object.
    LocalCopy,
}

impl SyncStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FunctionBackend => "server-lambda",
            Self::TaskBackend => "server-ecstask",
            Self::LocalCli => "local-sync",
            Self::LocalCopy => "local-copy",
        }
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStrategy {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "server-lambda" | "function" | "function-backend" => Ok(Self::FunctionBackend),
            "server-ecstask" | "task" | "task-backend" => Ok(Self::TaskBackend),
            "local-sync" | "cli" | "local-cli" => Ok(Self::LocalCli),
            "local-copy" | "copy" => Ok(Self::LocalCopy),
            _ => Err(SyncError::config(format!(
                "Unrecognized sync strategy '{value}' (expected server-lambda, server-ecstask, local-sync, or local-copy)"
            ))),
        }
    }
}

impl TryFrom<String> for SyncStrategy {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SyncStrategy> for String {
    fn from(value: SyncStrategy) -> Self {
        value.as_str().to_string()
    }
}

/// One directory-to-bucket binding. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSpec {
    pub name: String,
    pub source_directory: PathBuf,
    pub bucket: String,
    pub object_acl: Option<String>,
    pub strategy: SyncStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPath {
    /// Archive + lifecycle controller + remote executor.
    Lifecycle(ExecutorBackend),
    LocalCli,
    LocalCopy,
}

impl SyncPath {
    pub fn is_stateful(self) -> bool {
        matches!(self, Self::Lifecycle(_))
    }
}

pub fn select_sync_path(strategy: SyncStrategy) -> SyncPath {
    match strategy {
        SyncStrategy::FunctionBackend => SyncPath::Lifecycle(ExecutorBackend::Function),
        SyncStrategy::TaskBackend => SyncPath::Lifecycle(ExecutorBackend::Task),
        SyncStrategy::LocalCli => SyncPath::LocalCli,
        SyncStrategy::LocalCopy => SyncPath::LocalCopy,
    }
}

/// Parses a configured strategy name and maps it to its sync path.
pub fn resolve_sync_path(name: &str) -> Result<SyncPath, SyncError> {
    name.parse().map(select_sync_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_original_and_short_names() {
        assert_eq!(
            "server-lambda".parse::<SyncStrategy>().expect("lambda"),
            SyncStrategy::FunctionBackend
        );
        assert_eq!(
            "TASK".parse::<SyncStrategy>().expect("task"),
            SyncStrategy::TaskBackend
        );
        assert_eq!(
            "local-sync".parse::<SyncStrategy>().expect("cli"),
            SyncStrategy::LocalCli
        );
        assert_eq!(
            " copy ".parse::<SyncStrategy>().expect("copy"),
            SyncStrategy::LocalCopy
        );
    }

    #[test]
    fn unknown_strategy_is_invalid_configuration() {
        let error = resolve_sync_path("rsync").expect_err("unknown strategy");
        assert!(matches!(error, SyncError::InvalidConfiguration(_)));
        assert!(error.to_string().contains("'rsync'"));
    }

    #[test]
    fn server_strategies_select_lifecycle_paths() {
        assert_eq!(
            select_sync_path(SyncStrategy::FunctionBackend),
            SyncPath::Lifecycle(ExecutorBackend::Function)
        );
        assert_eq!(
            select_sync_path(SyncStrategy::TaskBackend),
            SyncPath::Lifecycle(ExecutorBackend::Task)
        );
        assert!(!select_sync_path(SyncStrategy::LocalCli).is_stateful());
        assert!(!select_sync_path(SyncStrategy::LocalCopy).is_stateful());
    }

    #[test]
    fn default_strategy_is_function_backend() {
        assert_eq!(SyncStrategy::default(), SyncStrategy::FunctionBackend);
    }

    #[test]
    fn strategy_round_trips_through_serde_names() {
        let value = serde_json::to_value(SyncStrategy::TaskBackend).expect("serialize");
        assert_eq!(value, serde_json::Value::from("server-ecstask"));
        let parsed: Result<SyncStrategy, _> = serde_json::from_value(serde_json::json!("bogus"));
        assert!(parsed.is_err());
    }
}
