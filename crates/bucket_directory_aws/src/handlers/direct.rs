//! Stateless strategies that write straight from this machine to the bucket.
//! Neither keeps a lifecycle record, so they cannot remove objects on delete.

use std::path::Path;
use std::process::Stdio;

use bucket_directory_core::error::{Result, SyncError};
use bucket_directory_core::storage_keys::object_key_for;
use bucket_directory_core::strategy::SyncSpec;
use walkdir::WalkDir;

use crate::adapters::object_store::{BucketObjects, ObjectUpload};
use crate::handlers::apply::content_type_for;

pub const DEFAULT_AWS_PROGRAM: &str = "aws";

/// Shells out to `aws s3 sync`.
#[derive(Debug, Clone)]
pub struct CliSync {
    program: String,
    region: Option<String>,
}

impl CliSync {
    pub fn new(region: Option<String>) -> Self {
        Self {
            program: DEFAULT_AWS_PROGRAM.to_string(),
            region,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn args_for(&self, spec: &SyncSpec) -> Vec<String> {
        let mut args = vec![
            "s3".to_string(),
            "sync".to_string(),
            spec.source_directory.display().to_string(),
            format!("s3://{}", spec.bucket),
        ];
        if let Some(acl) = &spec.object_acl {
            args.push(format!("--acl={acl}"));
        }
        if let Some(region) = &self.region {
            args.push(format!("--region={region}"));
        }
        args
    }

    pub async fn sync(&self, spec: &SyncSpec) -> Result<()> {
        let args = self.args_for(spec);
        let command = format!("{} {}", self.program, args.join(" "));
        tracing::info!(spec = %spec.name, command = %command, "running cli sync");

        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|error| SyncError::Command {
                command: command.clone(),
                status: "not started".to_string(),
                stderr: error.to_string(),
            })?;

        if !output.status.success() {
            return Err(SyncError::Command {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Uploads every regular file under the spec's directory as its own object.
/// Returns the number of objects written.
pub async fn copy_directory<B: BucketObjects + ?Sized>(objects: &B, spec: &SyncSpec) -> Result<usize> {
    let root = spec.source_directory.as_path();
    if !root.is_dir() {
        return Err(SyncError::io(
            root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "source is not a directory"),
        ));
    }

    let mut copied = 0;
    for (key, path) in directory_files(root)? {
        let body = tokio::fs::read(&path)
            .await
            .map_err(|error| SyncError::io(&path, error))?;
        let mut upload = ObjectUpload::new(key.clone(), body);
        upload.content_type = Some(content_type_for(&path));
        upload.acl = spec.object_acl.clone();
        objects
            .put_object(&spec.bucket, upload)
            .await
            .map_err(|message| SyncError::Upload {
                bucket: spec.bucket.clone(),
                key,
                message,
            })?;
        copied += 1;
    }

    tracing::info!(spec = %spec.name, bucket = %spec.bucket, objects = copied, "copied directory");
    Ok(copied)
}

fn directory_files(root: &Path) -> Result<Vec<(String, std::path::PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|error| {
            let path = error.path().unwrap_or(root).to_path_buf();
            SyncError::io(path, std::io::Error::from(error))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|error| SyncError::Archive(format!("{}: {error}", entry.path().display())))?;
        if let Some(key) = object_key_for(relative) {
            files.push((key, entry.path().to_path_buf()));
        }
    }
    Ok(files)
}
