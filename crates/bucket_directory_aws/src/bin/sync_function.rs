use std::time::Duration;

use bucket_directory_aws::adapters::object_store::S3Bucket;
use bucket_directory_aws::handlers::apply::{apply, ApplyConfig, DEFAULT_ARCHIVE_WAIT_ATTEMPTS};
use bucket_directory_aws::logging::{init_tracing, LogFormat};
use bucket_directory_core::contract::SyncRequest;
use chrono::Utc;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
struct ApplyResponse {
    status: String,
    bucket: String,
    uploaded: usize,
    deleted: usize,
    completed_at: String,
}

fn apply_config_from_env() -> Result<ApplyConfig, Error> {
    let attempts = match std::env::var("SYNC_ARCHIVE_WAIT_SECS") {
        Ok(value) => value
            .parse::<u32>()
            .map_err(|_| Error::from("SYNC_ARCHIVE_WAIT_SECS must be a non-negative integer"))?,
        Err(_) => DEFAULT_ARCHIVE_WAIT_ATTEMPTS,
    };
    Ok(ApplyConfig {
        archive_wait_attempts: attempts,
        archive_wait_interval: Duration::from_secs(1),
    })
}

async fn handle_request(event: LambdaEvent<Value>) -> Result<ApplyResponse, Error> {
    let request: SyncRequest = serde_json::from_value(event.payload)
        .map_err(|error| Error::from(format!("invalid sync request: {error}")))?;
    let config = apply_config_from_env()?;

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let objects = S3Bucket::new(aws_sdk_s3::Client::new(&aws_config));

    let summary = apply(&objects, &request, &config).await.map_err(|error| {
        tracing::error!(action = %request.action, bucket = %request.bucket, "apply failed: {error}");
        Error::from(error.to_string())
    })?;

    Ok(ApplyResponse {
        status: "ok".to_string(),
        bucket: request.bucket,
        uploaded: summary.uploaded,
        deleted: summary.deleted,
        completed_at: Utc::now().to_rfc3339(),
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing(LogFormat::Json);
    lambda_runtime::run(service_fn(handle_request)).await
}
