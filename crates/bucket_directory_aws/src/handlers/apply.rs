//! Remote side of a sync: expands a staged archive into its bucket, or
//! empties the bucket on Delete. Runs inside the sync function and the sync
//! task alike.

use std::collections::BTreeSet;
use std::io::Cursor;
use std::path::{Component, Path};
use std::time::{Duration, Instant};

use bucket_directory_core::contract::{SyncAction, SyncRequest};
use bucket_directory_core::storage_keys::{is_staging_key, object_key_for};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::adapters::object_store::{BucketObjects, ObjectUpload};
use crate::error::ApplyError;

pub const DEFAULT_ARCHIVE_WAIT_ATTEMPTS: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyConfig {
    /// Reads of the staged archive before giving up. The writer's
    /// permissions on the bucket may take a while to propagate.
    pub archive_wait_attempts: u32,
    pub archive_wait_interval: Duration,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            archive_wait_attempts: DEFAULT_ARCHIVE_WAIT_ATTEMPTS,
            archive_wait_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplySummary {
    pub uploaded: usize,
    pub deleted: usize,
}

pub async fn apply<B: BucketObjects + ?Sized>(
    objects: &B,
    request: &SyncRequest,
    config: &ApplyConfig,
) -> Result<ApplySummary, ApplyError> {
    let started_at = Instant::now();
    tracing::info!(
        action = %request.action,
        bucket = %request.bucket,
        archive_key = %request.archive_key,
        object_acl = request.object_acl.as_deref().unwrap_or("default"),
        "apply started"
    );

    let summary = match request.action {
        SyncAction::Create | SyncAction::Update => expand_archive(objects, request, config).await?,
        SyncAction::Delete => empty_bucket(objects, &request.bucket).await?,
    };

    tracing::info!(
        action = %request.action,
        bucket = %request.bucket,
        uploaded = summary.uploaded,
        deleted = summary.deleted,
        duration_ms = started_at.elapsed().as_millis(),
        "apply finished"
    );
    Ok(summary)
}

async fn expand_archive<B: BucketObjects + ?Sized>(
    objects: &B,
    request: &SyncRequest,
    config: &ApplyConfig,
) -> Result<ApplySummary, ApplyError> {
    let bucket = &request.bucket;
    let blob = wait_for_archive(objects, bucket, &request.archive_key, config).await?;

    let workdir = TempDir::new().map_err(|error| ApplyError::io(std::env::temp_dir(), error))?;
    unpack_archive(&blob, workdir.path())?;
    drop(blob);

    let mut uploaded = BTreeSet::new();
    for (key, path) in extracted_files(workdir.path())? {
        if is_staging_key(&key, &request.archive_key) {
            tracing::warn!(key = %key, "archive contains the staging key itself; skipping");
            continue;
        }
        let body = tokio::fs::read(&path)
            .await
            .map_err(|error| ApplyError::io(&path, error))?;
        let mut upload = ObjectUpload::new(key.clone(), body);
        upload.content_type = Some(content_type_for(&path));
        upload.acl = request.object_acl.clone();
        objects
            .put_object(bucket, upload)
            .await
            .map_err(|message| ApplyError::bucket(bucket, message))?;
        uploaded.insert(key);
    }

    // Anything not in the archive is stale, the staged archive included.
    let stale: Vec<String> = objects
        .list_keys(bucket)
        .await
        .map_err(|message| ApplyError::bucket(bucket, message))?
        .into_iter()
        .filter(|key| !uploaded.contains(key))
        .collect();
    objects
        .delete_keys(bucket, &stale)
        .await
        .map_err(|message| ApplyError::bucket(bucket, message))?;

    Ok(ApplySummary {
        uploaded: uploaded.len(),
        deleted: stale.len(),
    })
}

async fn empty_bucket<B: BucketObjects + ?Sized>(
    objects: &B,
    bucket: &str,
) -> Result<ApplySummary, ApplyError> {
    let keys = objects
        .list_keys(bucket)
        .await
        .map_err(|message| ApplyError::bucket(bucket, message))?;
    objects
        .delete_keys(bucket, &keys)
        .await
        .map_err(|message| ApplyError::bucket(bucket, message))?;
    Ok(ApplySummary {
        uploaded: 0,
        deleted: keys.len(),
    })
}

async fn wait_for_archive<B: BucketObjects + ?Sized>(
    objects: &B,
    bucket: &str,
    key: &str,
    config: &ApplyConfig,
) -> Result<Vec<u8>, ApplyError> {
    let attempts = config.archive_wait_attempts.max(1);
    for attempt in 1..=attempts {
        match objects.get_object(bucket, key).await {
            Ok(Some(blob)) => return Ok(blob),
            Ok(None) => tracing::debug!(attempt, bucket, key, "archive not visible yet"),
            Err(message) => tracing::debug!(attempt, bucket, key, "archive read failed: {message}"),
        }
        if attempt < attempts {
            tokio::time::sleep(config.archive_wait_interval).await;
        }
    }
    Err(ApplyError::ArchiveUnavailable {
        bucket: bucket.to_string(),
        key: key.to_string(),
        attempts,
    })
}

/// Extracts a tar.gz blob under `dest`, refusing entries that would land
/// outside it.
pub fn unpack_archive(blob: &[u8], dest: &Path) -> Result<usize, ApplyError> {
    let mut archive = tar::Archive::new(GzDecoder::new(Cursor::new(blob)));
    let entries = archive
        .entries()
        .map_err(|error| ApplyError::InvalidArchive(error.to_string()))?;

    let mut unpacked = 0;
    for entry in entries {
        let mut entry = entry.map_err(|error| ApplyError::InvalidArchive(error.to_string()))?;
        let path = entry
            .path()
            .map_err(|error| ApplyError::InvalidArchive(error.to_string()))?
            .into_owned();
        let escapes = path
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ApplyError::UnsafeEntry(path.display().to_string()));
        }

        let written = entry
            .unpack_in(dest)
            .map_err(|error| ApplyError::io(dest.join(&path), error))?;
        if !written {
            return Err(ApplyError::UnsafeEntry(path.display().to_string()));
        }
        unpacked += 1;
    }
    Ok(unpacked)
}

/// Regular files under `root` with their object keys, in key order. Symlinks
/// are not followed.
fn extracted_files(root: &Path) -> Result<Vec<(String, std::path::PathBuf)>, ApplyError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|error| {
            let path = error.path().unwrap_or(root).to_path_buf();
            ApplyError::io(path, std::io::Error::from(error))
        })?;
        if !entry.file_type().is_file() {
            if entry.file_type().is_symlink() {
                tracing::warn!(path = %entry.path().display(), "skipping symlink in archive");
            }
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|error| ApplyError::InvalidArchive(error.to_string()))?;
        let key = object_key_for(relative).ok_or_else(|| {
            ApplyError::UnsafeEntry(relative.display().to_string())
        })?;
        files.push((key, entry.path().to_path_buf()));
    }
    Ok(files)
}

pub fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tar::{EntryType, Header};

    use crate::adapters::object_store::MemoryBucket;

    use super::*;

    const BUCKET: &str = "site";
    const ARCHIVE_KEY: &str = "__bucket_directory.archive.tar.gz";

    fn config() -> ApplyConfig {
        ApplyConfig {
            archive_wait_attempts: 3,
            archive_wait_interval: Duration::from_millis(1),
        }
    }

    fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content) in files {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(content.len() as u64);
            builder
                .append_data(&mut header, path, content.as_bytes())
                .expect("append");
        }
        builder
            .into_inner()
            .expect("tar finish")
            .finish()
            .expect("gzip finish")
    }

    /// Hand-built tar whose single entry name is written verbatim, bypassing
    /// the path checks `tar::Builder` applies.
    fn raw_tarball(name: &str) -> Vec<u8> {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(1);
        {
            let bytes = header.as_old_mut().name.as_mut();
            bytes[..name.len()].copy_from_slice(name.as_bytes());
        }
        header.set_cksum();

        let mut raw = header.as_bytes().to_vec();
        let mut data = [0u8; 512];
        data[0] = b'x';
        raw.extend_from_slice(&data);
        raw.extend_from_slice(&[0u8; 1024]);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).expect("gzip write");
        encoder.finish().expect("gzip finish")
    }

    fn request(action: SyncAction, acl: Option<&str>) -> SyncRequest {
        SyncRequest::new(action, BUCKET, ARCHIVE_KEY, acl.map(str::to_string))
    }

    #[tokio::test]
    async fn create_uploads_files_and_removes_staged_archive() {
        let bucket = MemoryBucket::new();
        bucket.insert(
            BUCKET,
            ARCHIVE_KEY,
            &tarball(&[("a.txt", "hello"), ("b/c.txt", "world"), ("index.html", "<p/>")]),
        );

        let summary = apply(&bucket, &request(SyncAction::Create, Some("public-read")), &config())
            .await
            .expect("apply");

        assert_eq!(summary.uploaded, 3);
        assert_eq!(bucket.keys(BUCKET), vec!["a.txt", "b/c.txt", "index.html"]);
        let page = bucket.object(BUCKET, "index.html").expect("index");
        assert_eq!(page.content_type.as_deref(), Some("text/html"));
        assert_eq!(page.acl.as_deref(), Some("public-read"));
        assert_eq!(bucket.object(BUCKET, "b/c.txt").expect("c").body, b"world");
    }

    #[tokio::test]
    async fn update_deletes_keys_missing_from_archive() {
        let bucket = MemoryBucket::new();
        bucket.insert(BUCKET, "old.txt", b"stale");
        bucket.insert(BUCKET, "a.txt", b"previous");
        bucket.insert(BUCKET, ARCHIVE_KEY, &tarball(&[("a.txt", "hello")]));

        let summary = apply(&bucket, &request(SyncAction::Update, None), &config())
            .await
            .expect("apply");

        assert_eq!(summary.deleted, 2);
        assert_eq!(bucket.keys(BUCKET), vec!["a.txt"]);
        assert_eq!(bucket.object(BUCKET, "a.txt").expect("a").body, b"hello");
    }

    #[tokio::test]
    async fn delete_empties_bucket_and_is_idempotent() {
        let bucket = MemoryBucket::new();
        bucket.insert(BUCKET, "a.txt", b"hello");
        bucket.insert(BUCKET, "b/c.txt", b"world");

        let first = apply(&bucket, &request(SyncAction::Delete, None), &config())
            .await
            .expect("delete");
        let second = apply(&bucket, &request(SyncAction::Delete, None), &config())
            .await
            .expect("delete again");

        assert_eq!(first.deleted, 2);
        assert_eq!(second.deleted, 0);
        assert!(bucket.keys(BUCKET).is_empty());
    }

    #[tokio::test]
    async fn waits_for_archive_to_become_readable() {
        let bucket = MemoryBucket::new();
        bucket.insert(BUCKET, ARCHIVE_KEY, &tarball(&[("a.txt", "hello")]));
        bucket.hide_next_reads(2);

        let summary = apply(&bucket, &request(SyncAction::Create, None), &config())
            .await
            .expect("apply after retries");

        assert_eq!(summary.uploaded, 1);
    }

    #[tokio::test]
    async fn missing_archive_fails_after_bounded_attempts() {
        let bucket = MemoryBucket::new();
        bucket.insert(BUCKET, "keep.txt", b"untouched");

        let error = apply(&bucket, &request(SyncAction::Update, None), &config())
            .await
            .expect_err("no archive");

        assert!(matches!(
            error,
            ApplyError::ArchiveUnavailable { attempts: 3, .. }
        ));
        assert_eq!(bucket.keys(BUCKET), vec!["keep.txt"]);
    }

    #[test]
    fn rejects_parent_directory_entries() {
        let dest = TempDir::new().expect("tempdir");
        let error = unpack_archive(&raw_tarball("../escape.txt"), dest.path())
            .expect_err("traversal entry");
        assert!(matches!(error, ApplyError::UnsafeEntry(_)));
    }

    #[test]
    fn rejects_absolute_entries() {
        let dest = TempDir::new().expect("tempdir");
        let error =
            unpack_archive(&raw_tarball("/etc/passwd"), dest.path()).expect_err("absolute entry");
        assert!(matches!(error, ApplyError::UnsafeEntry(_)));
    }

    #[test]
    fn garbage_blob_is_invalid_archive() {
        let dest = TempDir::new().expect("tempdir");
        assert!(unpack_archive(b"definitely not gzip", dest.path()).is_err());
    }

    #[test]
    fn guesses_content_types_from_extension() {
        assert_eq!(content_type_for(Path::new("a/site.css")), "text/css");
        assert_eq!(
            content_type_for(Path::new("blob.unknownext")),
            "application/octet-stream"
        );
    }
}
