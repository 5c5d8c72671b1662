//! Remote execution backends that expand a staged archive into a bucket.
//!
//! Callers depend only on [`SyncExecutor`]; which variant runs is decided
//! once, when the executor is constructed.

mod function;
mod task;

use std::fmt;

use async_trait::async_trait;

use crate::contract::{SyncOutcome, SyncRequest};
use crate::error::Result;

pub use function::{FunctionExecutor, FunctionInvoker, InvocationResponse};
pub use task::{StoppedTask, TaskExecutor, TaskLaunch, TaskRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorBackend {
    Function,
    Task,
}

impl fmt::Display for ExecutorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function => f.write_str("function"),
            Self::Task => f.write_str("task"),
        }
    }
}

#[async_trait]
pub trait SyncExecutor: Send + Sync {
    fn backend(&self) -> ExecutorBackend;

    /// Rejects archives the backend cannot process. Called before the archive
    /// is uploaded, so a rejection leaves no remote side effect.
    fn check_capacity(&self, _archive_bytes: u64) -> Result<()> {
        Ok(())
    }

    /// Blocks until the remote action has completed or failed.
    async fn execute(&self, request: &SyncRequest) -> SyncOutcome;

    /// Called after an `execute` for `request` was dropped before finishing
    /// (timeout or cancellation). Backends whose remote work outlives the
    /// call stop it here; the others have nothing to do.
    async fn abandon(&self, _request: &SyncRequest) {}
}
