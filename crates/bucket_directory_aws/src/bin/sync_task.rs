//! Container entrypoint: `sync_task <Action> <Bucket> <ArchiveKey> [ObjectAcl]`.
//! A non-zero exit code is how the orchestrator learns the task failed.

use std::process::ExitCode;

use bucket_directory_aws::adapters::object_store::S3Bucket;
use bucket_directory_aws::error::ApplyError;
use bucket_directory_aws::handlers::apply::{apply, ApplyConfig, ApplySummary};
use bucket_directory_aws::logging::{init_tracing, LogFormat};
use bucket_directory_core::contract::SyncRequest;

async fn run(args: &[String]) -> Result<ApplySummary, ApplyError> {
    let request = SyncRequest::from_command_args(args)?;
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let objects = S3Bucket::new(aws_sdk_s3::Client::new(&aws_config));
    apply(&objects, &request, &ApplyConfig::default()).await
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing(LogFormat::Json);
    let args: Vec<String> = std::env::args().skip(1).collect();

    match run(&args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("sync task failed: {error}");
            ExitCode::FAILURE
        }
    }
}
