use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectCannedAcl, ObjectIdentifier};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bucket_directory_core::archive::Archive;
use bucket_directory_core::error::SyncError;
use bucket_directory_core::store::{ArchiveStore, StoredArchiveRef};
use sha2::{Digest, Sha256};

/// S3 accepts at most this many keys per DeleteObjects call.
const DELETE_BATCH_SIZE: usize = 1000;

pub const ARCHIVE_CONTENT_TYPE: &str = "application/gzip";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUpload {
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub acl: Option<String>,
    /// Base64 SHA-256 the store must verify the body against.
    pub checksum_sha256: Option<String>,
}

impl ObjectUpload {
    pub fn new(key: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            body,
            content_type: None,
            acl: None,
            checksum_sha256: None,
        }
    }
}

/// Object-level bucket access used by the apply handler, the archive store
/// and the local copy strategy.
#[async_trait]
pub trait BucketObjects: Send + Sync {
    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, String>;

    /// `Ok(None)` when the key does not exist (yet).
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, String>;

    /// Returns the base64 SHA-256 checksum the store recorded, if any.
    async fn put_object(&self, bucket: &str, upload: ObjectUpload)
        -> Result<Option<String>, String>;

    async fn delete_keys(&self, bucket: &str, keys: &[String]) -> Result<(), String>;
}

#[derive(Clone)]
pub struct S3Bucket {
    client: aws_sdk_s3::Client,
}

impl S3Bucket {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BucketObjects for S3Bucket {
    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, String> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|error| format!("failed to list objects in s3: {error}"))?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
        }
        Ok(keys)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, String> {
        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(error) => {
                let service_error = error.into_service_error();
                if service_error.is_no_such_key() {
                    return Ok(None);
                }
                return Err(format!("failed to read object from s3: {service_error}"));
            }
        };

        let body = output
            .body
            .collect()
            .await
            .map_err(|error| format!("failed to read object body from s3: {error}"))?;
        Ok(Some(body.into_bytes().to_vec()))
    }

    async fn put_object(
        &self,
        bucket: &str,
        upload: ObjectUpload,
    ) -> Result<Option<String>, String> {
        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(upload.key)
            .set_content_type(upload.content_type)
            .set_acl(upload.acl.as_deref().map(ObjectCannedAcl::from))
            .set_checksum_sha256(upload.checksum_sha256)
            .body(ByteStream::from(upload.body))
            .send()
            .await
            .map_err(|error| format!("failed to write object to s3: {error}"))?;
        Ok(output.checksum_sha256().map(str::to_string))
    }

    async fn delete_keys(&self, bucket: &str, keys: &[String]) -> Result<(), String> {
        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            let objects = batch
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|error| format!("invalid object key: {error}"))?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|error| format!("invalid delete request: {error}"))?;

            let output = self
                .client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|error| format!("failed to delete objects from s3: {error}"))?;
            if let Some(failure) = output.errors().first() {
                return Err(format!(
                    "failed to delete '{}' from s3: {}",
                    failure.key().unwrap_or_default(),
                    failure.message().unwrap_or("unknown error")
                ));
            }
        }
        Ok(())
    }
}

/// Stages archives in the target bucket itself, under the archive's key.
pub struct BucketArchiveStore<B> {
    objects: B,
}

impl<B: BucketObjects> BucketArchiveStore<B> {
    pub fn new(objects: B) -> Self {
        Self { objects }
    }
}

#[async_trait]
impl<B: BucketObjects> ArchiveStore for BucketArchiveStore<B> {
    async fn upload(
        &self,
        archive: &Archive,
        bucket: &str,
    ) -> bucket_directory_core::error::Result<StoredArchiveRef> {
        let upload_error = |message: String| SyncError::Upload {
            bucket: bucket.to_string(),
            key: archive.stored_key.clone(),
            message,
        };

        let mut upload = ObjectUpload::new(archive.stored_key.clone(), archive.blob.clone());
        upload.content_type = Some(ARCHIVE_CONTENT_TYPE.to_string());
        upload.checksum_sha256 = Some(BASE64.encode(Sha256::digest(&archive.blob)));

        let reported = self
            .objects
            .put_object(bucket, upload)
            .await
            .map_err(upload_error)?;

        let fingerprint = match reported {
            Some(checksum) => checksum_to_hex(&checksum).map_err(upload_error)?,
            None => {
                tracing::debug!(bucket, key = %archive.stored_key, "store reported no checksum");
                archive.fingerprint.clone()
            }
        };

        tracing::info!(
            bucket,
            key = %archive.stored_key,
            bytes = archive.blob.len(),
            fingerprint = %fingerprint,
            "uploaded archive"
        );
        Ok(StoredArchiveRef {
            key: archive.stored_key.clone(),
            fingerprint,
        })
    }
}

/// Converts a base64 SHA-256 as reported by S3 into the lowercase hex form
/// used for fingerprints.
pub fn checksum_to_hex(checksum: &str) -> Result<String, String> {
    let bytes = BASE64
        .decode(checksum)
        .map_err(|error| format!("store returned malformed checksum '{checksum}': {error}"))?;
    Ok(bytes.iter().map(|byte| format!("{byte:02x}")).collect())
}

#[cfg(any(test, feature = "test-helpers"))]
pub use memory::{MemoryBucket, StoredObject};

#[cfg(any(test, feature = "test-helpers"))]
mod memory {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct StoredObject {
        pub body: Vec<u8>,
        pub content_type: Option<String>,
        pub acl: Option<String>,
    }

    /// Buckets held in memory. Clones share contents.
    #[derive(Clone, Default)]
    pub struct MemoryBucket {
        objects: Arc<Mutex<BTreeMap<(String, String), StoredObject>>>,
        hidden_reads: Arc<Mutex<u32>>,
    }

    impl MemoryBucket {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, bucket: &str, key: &str, body: &[u8]) {
            self.objects.lock().expect("poisoned mutex").insert(
                (bucket.to_string(), key.to_string()),
                StoredObject {
                    body: body.to_vec(),
                    content_type: None,
                    acl: None,
                },
            );
        }

        /// The next `count` reads report keys as missing, as if the writer's
        /// permissions had not propagated yet.
        pub fn hide_next_reads(&self, count: u32) {
            *self.hidden_reads.lock().expect("poisoned mutex") = count;
        }

        pub fn keys(&self, bucket: &str) -> Vec<String> {
            self.objects
                .lock()
                .expect("poisoned mutex")
                .keys()
                .filter(|(name, _)| name == bucket)
                .map(|(_, key)| key.clone())
                .collect()
        }

        pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
            self.objects
                .lock()
                .expect("poisoned mutex")
                .get(&(bucket.to_string(), key.to_string()))
                .cloned()
        }
    }

    #[async_trait]
    impl BucketObjects for MemoryBucket {
        async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, String> {
            Ok(self.keys(bucket))
        }

        async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, String> {
            {
                let mut hidden = self.hidden_reads.lock().expect("poisoned mutex");
                if *hidden > 0 {
                    *hidden -= 1;
                    return Ok(None);
                }
            }
            Ok(self.object(bucket, key).map(|object| object.body))
        }

        async fn put_object(
            &self,
            bucket: &str,
            upload: ObjectUpload,
        ) -> Result<Option<String>, String> {
            let checksum = BASE64.encode(Sha256::digest(&upload.body));
            if let Some(expected) = &upload.checksum_sha256 {
                if *expected != checksum {
                    return Err(format!("checksum mismatch for '{}'", upload.key));
                }
            }
            self.objects.lock().expect("poisoned mutex").insert(
                (bucket.to_string(), upload.key),
                StoredObject {
                    body: upload.body,
                    content_type: upload.content_type,
                    acl: upload.acl,
                },
            );
            Ok(Some(checksum))
        }

        async fn delete_keys(&self, bucket: &str, keys: &[String]) -> Result<(), String> {
            let mut objects = self.objects.lock().expect("poisoned mutex");
            for key in keys {
                objects.remove(&(bucket.to_string(), key.clone()));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use bucket_directory_core::archive::content_fingerprint;

    use super::*;

    fn archive(blob: &[u8]) -> Archive {
        Archive {
            blob: blob.to_vec(),
            stored_key: "__bucket_directory.archive.tar.gz".to_string(),
            fingerprint: content_fingerprint(blob),
            entry_count: 1,
        }
    }

    #[test]
    fn checksum_hex_matches_local_fingerprint() {
        let blob = b"archive bytes";
        let reported = BASE64.encode(Sha256::digest(blob));
        assert_eq!(
            checksum_to_hex(&reported).expect("valid checksum"),
            content_fingerprint(blob)
        );
    }

    #[test]
    fn malformed_checksum_is_rejected() {
        assert!(checksum_to_hex("not base64!").is_err());
    }

    #[tokio::test]
    async fn archive_store_returns_store_reported_fingerprint() {
        let bucket = MemoryBucket::new();
        let store = BucketArchiveStore::new(bucket.clone());
        let archive = archive(b"tarball");

        let stored = store.upload(&archive, "site").await.expect("upload");

        assert_eq!(stored.key, archive.stored_key);
        assert_eq!(stored.fingerprint, archive.fingerprint);
        let object = bucket.object("site", &archive.stored_key).expect("staged");
        assert_eq!(object.content_type.as_deref(), Some(ARCHIVE_CONTENT_TYPE));
    }

    #[tokio::test]
    async fn repeated_upload_of_same_archive_is_harmless() {
        let bucket = MemoryBucket::new();
        let store = BucketArchiveStore::new(bucket.clone());
        let archive = archive(b"tarball");

        let first = store.upload(&archive, "site").await.expect("first");
        let second = store.upload(&archive, "site").await.expect("second");

        assert_eq!(first, second);
        assert_eq!(bucket.keys("site").len(), 1);
    }
}
