use std::path::PathBuf;
use std::process::ExitCode;

use bucket_directory_aws::handlers::directory::{load_aws_config, DirectoryOutcome, DirectorySyncer};
use bucket_directory_aws::logging::{init_tracing, LogFormat};
use bucket_directory_core::config::SyncConfig;
use bucket_directory_core::error::Result;
use bucket_directory_core::strategy::{select_sync_path, SyncSpec};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "bucket-directory",
    about = "Keep S3 buckets in sync with local directories"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, env = "BUCKET_DIRECTORY_CONFIG", default_value = "bucket-directory.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update buckets from their directories
    Sync {
        /// Only sync this directory (default: all configured)
        #[arg(long)]
        name: Option<String>,
    },
    /// Empty the bucket of a synced directory and forget its state
    Delete {
        /// Directory to delete
        name: String,
    },
    /// Show the recorded state of each directory
    Status {
        #[arg(long)]
        name: Option<String>,
    },
}

fn selected_specs(config: &SyncConfig, name: Option<&str>) -> Result<Vec<SyncSpec>> {
    match name {
        Some(name) => Ok(vec![config.spec(name)?]),
        None => Ok(config.specs()),
    }
}

/// Per-directory results of one `sync` run; one failure fails the run.
#[derive(Debug, Default)]
struct SyncTally {
    attempted: usize,
    failed: usize,
}

impl SyncTally {
    fn record<T, E>(&mut self, result: &std::result::Result<T, E>) {
        self.attempted += 1;
        if result.is_err() {
            self.failed += 1;
        }
    }

    fn succeeded(&self) -> bool {
        self.failed == 0
    }

    fn failure_summary(&self) -> Option<String> {
        (!self.succeeded()).then(|| {
            format!(
                "{} of {} directories failed to sync",
                self.failed, self.attempted
            )
        })
    }

    fn exit_code(&self) -> ExitCode {
        if self.succeeded() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }
}

fn describe(outcome: &DirectoryOutcome) -> String {
    match outcome {
        DirectoryOutcome::Lifecycle(report) => format!("{:?}", report.transition),
        DirectoryOutcome::Copied { objects } => format!("copied {objects} objects"),
        DirectoryOutcome::CliSynced => "synced via aws cli".to_string(),
        DirectoryOutcome::NothingToDelete => "nothing to delete".to_string(),
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = SyncConfig::load(&cli.config)?;
    let aws_config = load_aws_config(config.region.as_deref()).await;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling in-flight sync");
            on_signal.cancel();
        }
    });

    let syncer = DirectorySyncer::new(config, &aws_config).with_cancellation(cancel);

    match cli.command {
        Commands::Sync { name } => {
            let specs = selected_specs(syncer.config(), name.as_deref())?;
            let mut tally = SyncTally::default();
            // A failing directory does not stop the others.
            for spec in &specs {
                let result = syncer.sync(spec).await;
                tally.record(&result);
                match result {
                    Ok(outcome) => println!("{}: {}", spec.name, describe(&outcome)),
                    Err(error) => {
                        tracing::error!(spec = %spec.name, "sync failed: {error}");
                        eprintln!("{}: failed: {error}", spec.name);
                    }
                }
            }
            if let Some(summary) = tally.failure_summary() {
                eprintln!("{summary}");
            }
            return Ok(tally.exit_code());
        }
        Commands::Delete { name } => {
            let spec = syncer.config().spec(&name)?;
            let outcome = syncer.delete(&spec).await?;
            println!("{}: {}", spec.name, describe(&outcome));
        }
        Commands::Status { name } => {
            for spec in selected_specs(syncer.config(), name.as_deref())? {
                if !select_sync_path(spec.strategy).is_stateful() {
                    println!("{}: {} (stateless)", spec.name, spec.strategy);
                    continue;
                }
                match syncer.status(&spec)? {
                    Some(state) => println!(
                        "{}: s3://{} fingerprint={} acl={}",
                        spec.name,
                        state.bucket,
                        state.archive_fingerprint,
                        state.object_acl.as_deref().unwrap_or("-")
                    ),
                    None => println!("{}: not synced", spec.name),
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing(LogFormat::Compact);
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}
