use async_trait::async_trait;
use aws_sdk_lambda::types::InvocationType;
use bucket_directory_core::executor::{FunctionInvoker, InvocationResponse};

/// Synchronous (`RequestResponse`) Lambda invocation.
#[derive(Clone)]
pub struct AwsLambdaInvoker {
    lambda_client: aws_sdk_lambda::Client,
}

impl AwsLambdaInvoker {
    pub fn new(lambda_client: aws_sdk_lambda::Client) -> Self {
        Self { lambda_client }
    }
}

#[async_trait]
impl FunctionInvoker for AwsLambdaInvoker {
    async fn invoke(
        &self,
        function_name: &str,
        payload: Vec<u8>,
    ) -> Result<InvocationResponse, String> {
        let output = self
            .lambda_client
            .invoke()
            .function_name(function_name)
            .invocation_type(InvocationType::RequestResponse)
            .set_payload(Some(payload.into()))
            .send()
            .await
            .map_err(|error| format!("failed to invoke sync lambda: {error}"))?;

        Ok(InvocationResponse {
            function_error: output.function_error().map(str::to_string),
            payload: output.payload().map(|blob| blob.as_ref().to_vec()),
        })
    }
}
