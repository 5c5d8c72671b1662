//! Explicit orchestrator configuration, loaded once from TOML and passed in.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::storage_keys::STAGING_ARCHIVE_KEY;
use crate::strategy::{SyncSpec, SyncStrategy};

/// AWS Lambda stops working beyond this archive size.
pub const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 512 * 1024 * 1024;
pub const DEFAULT_EXECUTOR_TIMEOUT_SECS: u64 = 15 * 60;
pub const DEFAULT_TASK_POLL_INTERVAL_SECS: u64 = 6;
pub const DEFAULT_TASK_CONTAINER_NAME: &str = "container";
pub const DEFAULT_STATE_DIR: &str = ".bucket-directory/state";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_staging_key")]
    pub staging_key: String,
    #[serde(default = "default_executor_timeout_secs")]
    pub executor_timeout_secs: u64,
    #[serde(default)]
    pub function: Option<FunctionBackendConfig>,
    #[serde(default)]
    pub task: Option<TaskBackendConfig>,
    #[serde(default)]
    pub directories: Vec<DirectoryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FunctionBackendConfig {
    pub function_name: String,
    #[serde(default = "default_max_archive_bytes")]
    pub max_archive_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TaskBackendConfig {
    pub cluster: String,
    pub task_definition: String,
    #[serde(default = "default_container_name")]
    pub container_name: String,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default = "default_assign_public_ip")]
    pub assign_public_ip: bool,
    #[serde(default = "default_task_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl TaskBackendConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DirectoryConfig {
    pub name: String,
    pub source: PathBuf,
    pub bucket: String,
    #[serde(default)]
    pub object_acl: Option<String>,
    #[serde(default)]
    pub strategy: SyncStrategy,
}

impl DirectoryConfig {
    pub fn to_spec(&self) -> SyncSpec {
        SyncSpec {
            name: self.name.clone(),
            source_directory: self.source.clone(),
            bucket: self.bucket.clone(),
            object_acl: self.object_acl.clone().filter(|acl| !acl.trim().is_empty()),
            strategy: self.strategy,
        }
    }
}

impl SyncConfig {
    /// Reads, parses and validates a configuration file. Relative paths are
    /// resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|error| SyncError::io(path, error))?;
        let mut config = Self::from_toml_str(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_paths(base);
        }
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|error| SyncError::config(format!("malformed configuration: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn executor_timeout(&self) -> Duration {
        Duration::from_secs(self.executor_timeout_secs)
    }

    pub fn specs(&self) -> Vec<SyncSpec> {
        self.directories.iter().map(DirectoryConfig::to_spec).collect()
    }

    pub fn spec(&self, name: &str) -> Result<SyncSpec> {
        self.directories
            .iter()
            .find(|directory| directory.name == name)
            .map(DirectoryConfig::to_spec)
            .ok_or_else(|| SyncError::config(format!("no directory named '{name}' is configured")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.staging_key.trim().is_empty() {
            return Err(SyncError::config("staging_key cannot be empty"));
        }
        if self.executor_timeout_secs == 0 {
            return Err(SyncError::config(
                "executor_timeout_secs must be a positive integer",
            ));
        }

        let mut names = BTreeSet::new();
        for directory in &self.directories {
            if directory.name.trim().is_empty() {
                return Err(SyncError::config("directory names must be non-empty"));
            }
            if !names.insert(directory.name.as_str()) {
                return Err(SyncError::config(format!(
                    "directory '{}' is configured more than once",
                    directory.name
                )));
            }
            if directory.bucket.trim().is_empty() {
                return Err(SyncError::config(format!(
                    "directory '{}' is missing a bucket",
                    directory.name
                )));
            }
            if directory.source.as_os_str().is_empty() {
                return Err(SyncError::config(format!(
                    "directory '{}' is missing a source",
                    directory.name
                )));
            }
            self.validate_backend_for(directory)?;
        }

        Ok(())
    }

    fn validate_backend_for(&self, directory: &DirectoryConfig) -> Result<()> {
        match directory.strategy {
            SyncStrategy::FunctionBackend => {
                let function = self.function.as_ref().ok_or_else(|| {
                    SyncError::config(format!(
                        "directory '{}' uses {} but no [function] backend is configured",
                        directory.name, directory.strategy
                    ))
                })?;
                if function.function_name.trim().is_empty() {
                    return Err(SyncError::config("function.function_name cannot be empty"));
                }
                if function.max_archive_bytes == 0 {
                    return Err(SyncError::config(
                        "function.max_archive_bytes must be a positive integer",
                    ));
                }
            }
            SyncStrategy::TaskBackend => {
                let task = self.task.as_ref().ok_or_else(|| {
                    SyncError::config(format!(
                        "directory '{}' uses {} but no [task] backend is configured",
                        directory.name, directory.strategy
                    ))
                })?;
                if task.cluster.trim().is_empty() || task.task_definition.trim().is_empty() {
                    return Err(SyncError::config(
                        "task.cluster and task.task_definition are required",
                    ));
                }
                if task.subnets.is_empty() {
                    return Err(SyncError::config("task.subnets cannot be empty"));
                }
            }
            SyncStrategy::LocalCli | SyncStrategy::LocalCopy => {}
        }
        Ok(())
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        if self.state_dir.is_relative() {
            self.state_dir = base.join(&self.state_dir);
        }
        for directory in &mut self.directories {
            if directory.source.is_relative() {
                directory.source = base.join(&directory.source);
            }
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

fn default_staging_key() -> String {
    STAGING_ARCHIVE_KEY.to_string()
}

fn default_executor_timeout_secs() -> u64 {
    DEFAULT_EXECUTOR_TIMEOUT_SECS
}

fn default_max_archive_bytes() -> u64 {
    DEFAULT_MAX_ARCHIVE_BYTES
}

fn default_container_name() -> String {
    DEFAULT_TASK_CONTAINER_NAME.to_string()
}

fn default_assign_public_ip() -> bool {
    true
}

fn default_task_poll_interval_secs() -> u64 {
    DEFAULT_TASK_POLL_INTERVAL_SECS
}
