//! Deterministic tar+gzip packaging of a directory tree.
//!
//! Entries are written in sorted path order with every volatile header field
//! pinned (mtime, owner, group, names), so unchanged content always yields a
//! byte-identical blob and therefore an identical fingerprint.

use std::fs::{self, File, Metadata};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::{Compression, GzBuilder};
use sha2::{Digest, Sha256};
use tar::{EntryType, Header};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::error::{Result, SyncError};
use crate::storage_keys::{object_key_for, STAGING_ARCHIVE_KEY};

const FILE_MODE: u32 = 0o644;
const EXECUTABLE_MODE: u32 = 0o755;
const DIRECTORY_MODE: u32 = 0o755;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    pub blob: Vec<u8>,
    pub stored_key: String,
    pub fingerprint: String,
    pub entry_count: usize,
}

impl Archive {
    pub fn size(&self) -> u64 {
        self.blob.len() as u64
    }
}

pub fn content_fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    staging_key: String,
    scratch_dir: Option<PathBuf>,
    compression: Compression,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new(STAGING_ARCHIVE_KEY)
    }
}

impl ArchiveBuilder {
    pub fn new(staging_key: impl Into<String>) -> Self {
        Self {
            staging_key: staging_key.into(),
            scratch_dir: None,
            compression: Compression::default(),
        }
    }

    /// Stage the archive under `dir` instead of the system temp directory.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn build(&self, source: &Path) -> Result<Archive> {
        let root = fs::metadata(source).map_err(|error| SyncError::io(source, error))?;
        if !root.is_dir() {
            return Err(SyncError::io(
                source,
                io::Error::new(io::ErrorKind::InvalidInput, "source is not a directory"),
            ));
        }

        // Removed when dropped, including on every early return below.
        let mut scratch = self.scratch_file()?;
        let entry_count = self.write_entries(source, scratch.as_file_mut())?;

        let scratch_path = scratch.path().to_path_buf();
        let file = scratch.as_file_mut();
        let mut blob = Vec::new();
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_end(&mut blob))
            .map_err(|error| SyncError::io(scratch_path, error))?;

        let fingerprint = content_fingerprint(&blob);
        tracing::debug!(
            source = %source.display(),
            entries = entry_count,
            bytes = blob.len(),
            fingerprint = %fingerprint,
            "built directory archive"
        );

        Ok(Archive {
            blob,
            stored_key: self.staging_key.clone(),
            fingerprint,
            entry_count,
        })
    }

    fn scratch_file(&self) -> Result<NamedTempFile> {
        match &self.scratch_dir {
            Some(dir) => NamedTempFile::new_in(dir).map_err(|error| SyncError::io(dir, error)),
            None => NamedTempFile::new().map_err(|error| SyncError::io(std::env::temp_dir(), error)),
        }
    }

    fn write_entries(&self, source: &Path, output: &mut File) -> Result<usize> {
        let encoder = GzBuilder::new().write(output, self.compression);
        let mut builder = tar::Builder::new(encoder);
        let mut entry_count = 0usize;

        let walker = WalkDir::new(source)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry.map_err(|error| {
                let path = error.path().unwrap_or(source).to_path_buf();
                SyncError::io(path, io::Error::from(error))
            })?;
            let path = entry.path();
            let relative = path
                .strip_prefix(source)
                .map_err(|error| SyncError::Archive(format!("{}: {error}", path.display())))?;
            let name = object_key_for(relative).ok_or_else(|| {
                SyncError::Archive(format!("unsupported entry path '{}'", relative.display()))
            })?;
            let metadata = entry
                .metadata()
                .map_err(|error| SyncError::io(path, io::Error::from(error)))?;

            let file_type = metadata.file_type();
            if file_type.is_dir() {
                let mut header = pinned_header(EntryType::Directory, DIRECTORY_MODE, 0);
                builder
                    .append_data(&mut header, format!("{name}/"), io::empty())
                    .map_err(|error| append_error(&name, error))?;
            } else if file_type.is_file() {
                let file = File::open(path).map_err(|error| SyncError::io(path, error))?;
                let mut header =
                    pinned_header(EntryType::Regular, file_mode(&metadata), metadata.len());
                builder
                    .append_data(&mut header, &name, file)
                    .map_err(|error| append_error(&name, error))?;
            } else if file_type.is_symlink() {
                let target = fs::read_link(path).map_err(|error| SyncError::io(path, error))?;
                let mut header = pinned_header(EntryType::Symlink, EXECUTABLE_MODE, 0);
                builder
                    .append_link(&mut header, &name, &target)
                    .map_err(|error| append_error(&name, error))?;
            } else {
                tracing::debug!(path = %path.display(), "skipping special file");
                continue;
            }
            entry_count += 1;
        }

        let encoder = builder
            .into_inner()
            .map_err(|error| SyncError::Archive(format!("tar finalize failed: {error}")))?;
        encoder
            .finish()
            .map_err(|error| SyncError::Archive(format!("gzip finish failed: {error}")))?;

        Ok(entry_count)
    }
}

fn pinned_header(entry_type: EntryType, mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

fn append_error(name: &str, error: io::Error) -> SyncError {
    SyncError::Archive(format!("failed to append '{name}': {error}"))
}

#[cfg(unix)]
fn file_mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;

    if metadata.permissions().mode() & 0o111 != 0 {
        EXECUTABLE_MODE
    } else {
        FILE_MODE
    }
}

#[cfg(not(unix))]
fn file_mode(_metadata: &Metadata) -> u32 {
    FILE_MODE
}
