//! Object Store Adapter (spec component 1): streamed put/get/stat/delete of
//! opaque paths, plus presigned URL minting. Grounded on the `StorageBackend`
//! trait and backend family in the crate this registry is adapted from.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::error::{RegistryError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignMethod {
    Get,
    Put,
}

/// A minimal capability set over opaque, forward-slash-separated paths.
///
/// Implementations guarantee atomic visibility: a reader either sees the
/// complete object or nothing — an interrupted write must never be
/// observable as a partial object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes `data` to `path` as a single atomic operation (the
    /// monolithic-PUT path of the upload protocol).
    async fn put(&self, path: &str, data: Bytes) -> Result<()>;

    /// Appends `data` to the staging object at `path`, creating it if
    /// absent. Used by `PATCH` of a resumable upload. Returns the new total
    /// length.
    async fn append(&self, path: &str, data: Bytes) -> Result<u64>;

    /// Reads the full object at `path`, or `None` if it does not exist.
    async fn get(&self, path: &str) -> Result<Option<Bytes>>;

    /// Returns the size of the object at `path`, or `None` if absent.
    async fn stat(&self, path: &str) -> Result<Option<u64>>;

    /// Deletes the object at `path`. Deleting a missing object is not an
    /// error (idempotent).
    async fn delete(&self, path: &str) -> Result<()>;

    /// Copies the bytes at `src` to `dst`, atomically with respect to
    /// readers of `dst`. Used to finalize a staged upload into its final
    /// content-addressed location.
    async fn copy(&self, src: &str, dst: &str) -> Result<()>;

    /// Mints a presigned URL for `path`, valid for `ttl`.
    async fn presign(&self, path: &str, method: PresignMethod, ttl: Duration) -> Result<String>;
}

/// In-memory object store. Used for tests and for local development without
/// a configured backend.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        self.objects
            .write()
            .await
            .insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn append(&self, path: &str, data: Bytes) -> Result<u64> {
        let mut objects = self.objects.write().await;
        let entry = objects.entry(path.to_string()).or_default();
        entry.extend_from_slice(&data);
        Ok(entry.len() as u64)
    }

    async fn get(&self, path: &str) -> Result<Option<Bytes>> {
        Ok(self
            .objects
            .read()
            .await
            .get(path)
            .map(|v| Bytes::from(v.clone())))
    }

    async fn stat(&self, path: &str) -> Result<Option<u64>> {
        Ok(self.objects.read().await.get(path).map(|v| v.len() as u64))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects.write().await.remove(path);
        Ok(())
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let data = {
            let objects = self.objects.read().await;
            objects
                .get(src)
                .cloned()
                .ok_or_else(|| RegistryError::Storage(format!("copy source missing: {src}")))?
        };
        self.objects.write().await.insert(dst.to_string(), data);
        Ok(())
    }

    async fn presign(&self, path: &str, method: PresignMethod, ttl: Duration) -> Result<String> {
        let verb = match method {
            PresignMethod::Get => "get",
            PresignMethod::Put => "put",
        };
        Ok(format!(
            "memory://{path}?method={verb}&ttl={}",
            ttl.as_secs()
        ))
    }
}

/// Filesystem-backed object store. Paths are sharded the way blob digests
/// are: nothing clever beyond joining the opaque path onto `root`, since
/// blob paths already carry their own `blobs/<digest>` shape and digests
/// are themselves evenly distributed.
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FilesystemObjectStore { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let dest = self.resolve(path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = dest.with_extension("tmp-upload");
        {
            let mut f = tokio::fs::File::create(&tmp).await?;
            f.write_all(&data).await?;
            f.flush().await?;
        }
        tokio::fs::rename(&tmp, &dest).await?;
        Ok(())
    }

    async fn append(&self, path: &str, data: Bytes) -> Result<u64> {
        let dest = self.resolve(path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&dest)
            .await?;
        f.write_all(&data).await?;
        f.flush().await?;
        let meta = tokio::fs::metadata(&dest).await?;
        Ok(meta.len())
    }

    async fn get(&self, path: &str) -> Result<Option<Bytes>> {
        let dest = self.resolve(path);
        match tokio::fs::read(&dest).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn stat(&self, path: &str) -> Result<Option<u64>> {
        match tokio::fs::metadata(self.resolve(path)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match tokio::fs::remove_file(self.resolve(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let src_path = self.resolve(src);
        let dst_path = self.resolve(dst);
        if let Some(parent) = dst_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = dst_path.with_extension("tmp-copy");
        tokio::fs::copy(&src_path, &tmp).await?;
        tokio::fs::rename(&tmp, &dst_path).await?;
        Ok(())
    }

    async fn presign(&self, path: &str, method: PresignMethod, ttl: Duration) -> Result<String> {
        let verb = match method {
            PresignMethod::Get => "get",
            PresignMethod::Put => "put",
        };
        Ok(format!(
            "file://{}?method={verb}&ttl={}",
            self.resolve(path).display(),
            ttl.as_secs()
        ))
    }
}

/// S3-compatible backend (S3, R2, MinIO). Object keys are the opaque paths
/// directly; no further sharding is applied since digests are already
/// evenly distributed hex strings.
#[cfg(feature = "s3")]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

#[cfg(feature = "s3")]
impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        S3ObjectStore {
            client,
            bucket: bucket.into(),
        }
    }

    /// Builds a client from the environment, optionally pointed at a
    /// MinIO/R2-compatible endpoint.
    pub async fn from_env(bucket: impl Into<String>, endpoint: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared_config = loader.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&shared_config);
        if endpoint.is_some() {
            s3_config = s3_config.force_path_style(true);
        }
        let client = aws_sdk_s3::Client::from_conf(s3_config.build());
        S3ObjectStore::new(client, bucket)
    }

    async fn ensure_bucket(&self) -> Result<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(_) => {
                // Bucket initialization is idempotent: a pre-existing bucket
                // is not a failure, and we do not treat creation failure as
                // fatal here since the bucket may already exist under a
                // policy that denies HeadBucket but allows object ops.
                let _ = self.client.create_bucket().bucket(&self.bucket).send().await;
                Ok(())
            }
        }
    }
}

#[cfg(feature = "s3")]
#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        self.ensure_bucket().await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(data.into())
            .send()
            .await
            .map_err(|e| RegistryError::Storage(format!("s3 put {path}: {e}")))?;
        Ok(())
    }

    async fn append(&self, path: &str, data: Bytes) -> Result<u64> {
        // S3 has no native append; staging objects are small enough in
        // practice (chunked client uploads) to read-modify-write.
        let existing = self.get(path).await?.unwrap_or_default();
        let mut combined = existing.to_vec();
        combined.extend_from_slice(&data);
        let len = combined.len() as u64;
        self.put(path, Bytes::from(combined)).await?;
        Ok(len)
    }

    async fn get(&self, path: &str) -> Result<Option<Bytes>> {
        match self.client.get_object().bucket(&self.bucket).key(path).send().await {
            Ok(output) => {
                let data = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| RegistryError::Storage(format!("s3 body read {path}: {e}")))?;
                Ok(Some(data.into_bytes()))
            }
            Err(aws_sdk_s3::error::SdkError::ServiceError(se))
                if se.err().is_no_such_key() =>
            {
                Ok(None)
            }
            Err(e) => Err(RegistryError::Storage(format!("s3 get {path}: {e}"))),
        }
    }

    async fn stat(&self, path: &str) -> Result<Option<u64>> {
        match self.client.head_object().bucket(&self.bucket).key(path).send().await {
            Ok(output) => Ok(Some(output.content_length().unwrap_or_default() as u64)),
            Err(aws_sdk_s3::error::SdkError::ServiceError(se))
                if se.raw().status().as_u16() == 404 =>
            {
                Ok(None)
            }
            Err(e) => Err(RegistryError::Storage(format!("s3 head {path}: {e}"))),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| RegistryError::Storage(format!("s3 delete {path}: {e}")))?;
        Ok(())
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, src))
            .key(dst)
            .send()
            .await
            .map_err(|e| RegistryError::Storage(format!("s3 copy {src}->{dst}: {e}")))?;
        Ok(())
    }

    async fn presign(&self, path: &str, method: PresignMethod, ttl: Duration) -> Result<String> {
        let presign_config = aws_sdk_s3::presigning::PresigningConfig::expires_in(ttl)
            .map_err(|e| RegistryError::Storage(format!("presign config: {e}")))?;
        let presigned = match method {
            PresignMethod::Get => {
                self.client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(path)
                    .presigned(presign_config)
                    .await
            }
            PresignMethod::Put => {
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(path)
                    .presigned(presign_config)
                    .await
            }
        }
        .map_err(|e| RegistryError::Storage(format!("s3 presign {path}: {e}")))?;
        Ok(presigned.uri().to_string())
    }
}

/// Builds the path for a content-addressed blob.
pub fn blob_path(digest: &str) -> String {
    format!("blobs/{digest}")
}

/// Builds the path for a manifest stored under a repository reference
/// (tag or digest).
pub fn manifest_path(repo: &str, reference: &str) -> String {
    format!("manifests/{repo}/{reference}")
}

/// Builds the path for a resumable upload's staging object.
pub fn upload_path(upload_id: &str) -> String {
    format!("uploads/{upload_id}")
}

pub fn path_parent(path: &str) -> Option<&Path> {
    Path::new(path).parent()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_put_get_roundtrip() {
        let store = InMemoryObjectStore::new();
        store.put("blobs/sha256:abc", Bytes::from_static(b"hello")).await.unwrap();
        let data = store.get("blobs/sha256:abc").await.unwrap().unwrap();
        assert_eq!(&data[..], b"hello");
        assert_eq!(store.stat("blobs/sha256:abc").await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn in_memory_append_accumulates() {
        let store = InMemoryObjectStore::new();
        let n1 = store.append("uploads/u1", Bytes::from_static(b"abc")).await.unwrap();
        let n2 = store.append("uploads/u1", Bytes::from_static(b"def")).await.unwrap();
        assert_eq!(n1, 3);
        assert_eq!(n2, 6);
        let data = store.get("uploads/u1").await.unwrap().unwrap();
        assert_eq!(&data[..], b"abcdef");
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = InMemoryObjectStore::new();
        assert!(store.get("blobs/missing").await.unwrap().is_none());
        assert!(store.stat("blobs/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_missing_is_not_an_error() {
        let store = InMemoryObjectStore::new();
        store.delete("blobs/missing").await.unwrap();
    }

    #[tokio::test]
    async fn copy_duplicates_object() {
        let store = InMemoryObjectStore::new();
        store.put("uploads/u1", Bytes::from_static(b"payload")).await.unwrap();
        store.copy("uploads/u1", "blobs/sha256:x").await.unwrap();
        let data = store.get("blobs/sha256:x").await.unwrap().unwrap();
        assert_eq!(&data[..], b"payload");
    }

    #[tokio::test]
    async fn filesystem_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path());
        store.put("blobs/sha256:abc", Bytes::from_static(b"hello")).await.unwrap();
        let data = store.get("blobs/sha256:abc").await.unwrap().unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[tokio::test]
    async fn filesystem_append_then_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path());
        store.append("uploads/u1", Bytes::from_static(b"ab")).await.unwrap();
        store.append("uploads/u1", Bytes::from_static(b"cd")).await.unwrap();
        store.copy("uploads/u1", "blobs/sha256:final").await.unwrap();
        let data = store.get("blobs/sha256:final").await.unwrap().unwrap();
        assert_eq!(&data[..], b"abcd");
    }
}
