use async_trait::async_trait;

use crate::config::FunctionBackendConfig;
use crate::contract::{SyncOutcome, SyncRequest};
use crate::error::SyncError;

use super::{ExecutorBackend, SyncExecutor};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationResponse {
    /// Set when the function itself raised, e.g. `Unhandled`.
    pub function_error: Option<String>,
    pub payload: Option<Vec<u8>>,
}

/// Single synchronous request/response call to a deployed function.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, function_name: &str, payload: Vec<u8>)
        -> Result<InvocationResponse, String>;
}

pub struct FunctionExecutor<I> {
    invoker: I,
    config: FunctionBackendConfig,
}

impl<I: FunctionInvoker> FunctionExecutor<I> {
    pub fn new(invoker: I, config: FunctionBackendConfig) -> Self {
        Self { invoker, config }
    }

    pub fn function_name(&self) -> &str {
        &self.config.function_name
    }
}

#[async_trait]
impl<I: FunctionInvoker> SyncExecutor for FunctionExecutor<I> {
    fn backend(&self) -> ExecutorBackend {
        ExecutorBackend::Function
    }

    fn check_capacity(&self, archive_bytes: u64) -> crate::error::Result<()> {
        if archive_bytes > self.config.max_archive_bytes {
            return Err(SyncError::CapacityExceeded {
                size: archive_bytes,
                limit: self.config.max_archive_bytes,
            });
        }
        Ok(())
    }

    async fn execute(&self, request: &SyncRequest) -> SyncOutcome {
        let function_name = self.function_name();
        let payload = match serde_json::to_vec(request) {
            Ok(value) => value,
            Err(error) => return SyncOutcome::failed(format!("failed to encode request: {error}")),
        };

        tracing::info!(
            function = function_name,
            action = %request.action,
            bucket = %request.bucket,
            archive_key = %request.archive_key,
            "invoking sync function"
        );

        match self.invoker.invoke(function_name, payload).await {
            Ok(InvocationResponse {
                function_error: Some(kind),
                payload,
            }) => {
                let raw = payload
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .unwrap_or_default();
                SyncOutcome::failed(format!(
                    "Invoking sync function '{function_name}' failed [{kind}]: {raw}"
                ))
            }
            Ok(_) => SyncOutcome::succeeded(),
            Err(error) => SyncOutcome::failed(format!(
                "Invoking sync function '{function_name}' failed: {error}"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crate::contract::SyncAction;

    use super::*;

    struct ScriptedInvoker {
        response: Result<InvocationResponse, String>,
        calls: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl ScriptedInvoker {
        fn new(response: Result<InvocationResponse, String>) -> Self {
            Self {
                response,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl FunctionInvoker for ScriptedInvoker {
        async fn invoke(
            &self,
            function_name: &str,
            payload: Vec<u8>,
        ) -> Result<InvocationResponse, String> {
            self.calls
                .lock()
                .expect("poisoned mutex")
                .push((function_name.to_string(), payload));
            self.response.clone()
        }
    }

    fn config(max_archive_bytes: u64) -> FunctionBackendConfig {
        FunctionBackendConfig {
            function_name: "sync-fn".to_string(),
            max_archive_bytes,
        }
    }

    fn request() -> SyncRequest {
        SyncRequest::new(
            SyncAction::Update,
            "test-bucket",
            "__bucket_directory.archive.tar.gz",
            Some("public-read".to_string()),
        )
    }

    #[tokio::test]
    async fn sends_structured_payload_and_succeeds() {
        let executor = FunctionExecutor::new(
            ScriptedInvoker::new(Ok(InvocationResponse::default())),
            config(1024),
        );

        let outcome = executor.execute(&request()).await;

        assert!(outcome.success);
        let calls = executor.invoker.calls.lock().expect("poisoned mutex");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "sync-fn");
        let body: serde_json::Value = serde_json::from_slice(&calls[0].1).expect("json payload");
        assert_eq!(body["Action"], "Update");
        assert_eq!(body["ObjectAcl"], "public-read");
    }

    #[tokio::test]
    async fn function_error_surfaces_raw_payload() {
        let executor = FunctionExecutor::new(
            ScriptedInvoker::new(Ok(InvocationResponse {
                function_error: Some("Unhandled".to_string()),
                payload: Some(br#"{"errorMessage":"access denied"}"#.to_vec()),
            })),
            config(1024),
        );

        let outcome = executor.execute(&request()).await;

        assert!(!outcome.success);
        let detail = outcome.error_detail.expect("detail");
        assert!(detail.contains("[Unhandled]"));
        assert!(detail.contains("access denied"));
    }

    #[tokio::test]
    async fn invocation_transport_error_is_failure() {
        let executor = FunctionExecutor::new(
            ScriptedInvoker::new(Err("throttled".to_string())),
            config(1024),
        );

        let outcome = executor.execute(&request()).await;

        assert!(!outcome.success);
        assert!(outcome.error_detail.expect("detail").contains("throttled"));
    }

    #[test]
    fn oversized_archive_is_capacity_exceeded() {
        let executor = FunctionExecutor::new(
            ScriptedInvoker::new(Ok(InvocationResponse::default())),
            config(1024),
        );

        assert!(executor.check_capacity(1024).is_ok());
        let error = executor.check_capacity(1025).expect_err("over limit");
        assert!(matches!(
            error,
            SyncError::CapacityExceeded {
                size: 1025,
                limit: 1024
            }
        ));
    }
}
