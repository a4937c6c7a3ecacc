use crate::keys::{directory_prefix, object_key};
use crate::traits::{ObjectEntry, ObjectStorage, StorageError, StorageResult};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectStore, ObjectStoreExt, WriteMultipart};
use secstore_core::StoreKind;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const CHUNK_SIZE: usize = 8 * 1024 * 1024;
const MAX_INFLIGHT_PARTS: usize = 4;

/// S3-compatible object storage backed by `object_store`.
#[derive(Clone)]
pub struct S3Storage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: Option<String>,
}

impl S3Storage {
    /// Build a client for `bucket`. `endpoint` selects an S3-compatible
    /// provider (MinIO, Ceph RGW); plain `http://` endpoints are allowed.
    pub fn new(
        bucket: String,
        region: Option<String>,
        endpoint: Option<String>,
        access_key: String,
        secret_key: String,
        prefix: Option<String>,
    ) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket.clone())
            .with_region(region.unwrap_or_else(|| "us-east-1".to_string()))
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);

        if let Some(ref endpoint) = endpoint {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http)
                .with_virtual_hosted_style_request(false);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(Self::with_store(Arc::new(store), bucket, prefix))
    }

    /// Wrap an existing `ObjectStore` (used with `InMemory` in tests).
    pub fn with_store(store: Arc<dyn ObjectStore>, bucket: String, prefix: Option<String>) -> Self {
        S3Storage {
            store,
            bucket,
            prefix,
        }
    }

    fn location(&self, key: &str) -> StorageResult<ObjectPath> {
        Ok(ObjectPath::from(object_key(self.prefix.as_deref(), key)?))
    }

    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        match self.prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(prefix) if !prefix.is_empty() => key
                .strip_prefix(prefix)
                .map(|k| k.trim_start_matches('/'))
                .unwrap_or(key),
            _ => key,
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    fn kind(&self) -> StoreKind {
        StoreKind::S3
    }

    async fn put_file(&self, key: &str, file: &Path) -> StorageResult<u64> {
        let location = self.location(key)?;
        let start = std::time::Instant::now();

        let mut reader = tokio::fs::File::open(file).await?;
        let upload = self.store.put_multipart(&location).await.map_err(|e| {
            tracing::error!(error = %e, bucket = %self.bucket, key = %location, "S3 multipart start failed");
            StorageError::UploadFailed(e.to_string())
        })?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, CHUNK_SIZE);

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    let _ = writer.abort().await;
                    return Err(StorageError::IoError(e));
                }
            };
            if n == 0 {
                break;
            }
            if let Err(e) = writer.wait_for_capacity(MAX_INFLIGHT_PARTS).await {
                let _ = writer.abort().await;
                return Err(StorageError::UploadFailed(e.to_string()));
            }
            writer.write(&buf[..n]);
            total += n as u64;
        }

        writer.finish().await.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %location,
                size_bytes = total,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 upload failed"
            );
            StorageError::UploadFailed(e.to_string())
        })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %location,
            size_bytes = total,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(total)
    }

    async fn get_to_file(&self, key: &str, dest: &Path) -> StorageResult<u64> {
        let location = self.location(key)?;
        let start = std::time::Instant::now();

        let result = self.store.get(&location).await.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
            other => {
                tracing::error!(
                    error = %other,
                    bucket = %self.bucket,
                    key = %location,
                    "S3 download failed"
                );
                StorageError::DownloadFailed(other.to_string())
            }
        })?;

        let mut out = tokio::fs::File::create(dest).await?;
        let mut stream = result.into_stream();
        let mut total = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
            out.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }
        out.flush().await?;

        tracing::info!(
            bucket = %self.bucket,
            key = %location,
            size_bytes = total,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 download successful"
        );

        Ok(total)
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectEntry>> {
        let location = self.location(prefix)?;
        let listed: Vec<_> = self
            .store
            .list(Some(&location))
            .try_collect()
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        Ok(listed
            .into_iter()
            .map(|meta| ObjectEntry {
                key: self.strip_prefix(meta.location.as_ref()).to_string(),
                size: meta.size as u64,
            })
            .collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let start = std::time::Instant::now();
        let entries = self.list(&directory_prefix(prefix)).await?;
        for entry in &entries {
            let location = self.location(&entry.key)?;
            match self.store.delete(&location).await {
                Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {}
                Err(e) => {
                    tracing::error!(error = %e, bucket = %self.bucket, key = %location, "S3 delete failed");
                    return Err(StorageError::DeleteFailed(e.to_string()));
                }
            }
        }

        tracing::info!(
            bucket = %self.bucket,
            prefix = %prefix,
            deleted = entries.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 prefix delete successful"
        );

        Ok(entries.len())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        if !self.exists(key).await? {
            return Ok(false);
        }
        let location = self.location(key)?;
        match self.store.delete(&location).await {
            Ok(()) => {
                tracing::info!(bucket = %self.bucket, key = %location, "S3 object deleted");
                Ok(true)
            }
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => {
                tracing::error!(error = %e, bucket = %self.bucket, key = %location, "S3 delete failed");
                Err(StorageError::DeleteFailed(e.to_string()))
            }
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let location = self.location(key)?;
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use tempfile::tempdir;

    fn storage(prefix: Option<&str>) -> S3Storage {
        S3Storage::with_store(
            Arc::new(InMemory::new()),
            "secondary".to_string(),
            prefix.map(String::from),
        )
    }

    #[tokio::test]
    async fn test_put_then_get_file() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("disk.qcow2");
        std::fs::write(&src, vec![5u8; 300_000]).unwrap();

        let s3 = storage(Some("zone1"));
        let written = s3
            .put_file("template/tmpl/2/201/disk.qcow2", &src)
            .await
            .unwrap();
        assert_eq!(written, 300_000);
        assert!(s3.exists("template/tmpl/2/201/disk.qcow2").await.unwrap());

        let dest = dir.path().join("copy.qcow2");
        let read = s3
            .get_to_file("template/tmpl/2/201/disk.qcow2", &dest)
            .await
            .unwrap();
        assert_eq!(read, 300_000);
        assert_eq!(std::fs::read(&dest).unwrap(), vec![5u8; 300_000]);
    }

    #[tokio::test]
    async fn test_delete_exact_key_leaves_siblings() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("f");
        std::fs::write(&src, b"abc").unwrap();

        let s3 = storage(None);
        s3.put_file("snapshots/2/9/s1", &src).await.unwrap();
        s3.put_file("snapshots/2/9/s2", &src).await.unwrap();

        assert!(s3.delete("snapshots/2/9/s1").await.unwrap());
        assert!(!s3.delete("snapshots/2/9/s1").await.unwrap());
        assert!(s3.exists("snapshots/2/9/s2").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_strips_prefix() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("f");
        std::fs::write(&src, b"abc").unwrap();

        let s3 = storage(Some("zone1"));
        s3.put_file("volumes/2/9/a.img", &src).await.unwrap();
        let listed = s3.list("volumes/2").await.unwrap();
        assert_eq!(
            listed,
            vec![ObjectEntry {
                key: "volumes/2/9/a.img".to_string(),
                size: 3
            }]
        );
    }

    #[tokio::test]
    async fn test_delete_prefix_is_recursive_and_idempotent() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("f");
        std::fs::write(&src, b"abc").unwrap();

        let s3 = storage(None);
        s3.put_file("snapshots/2/9/a", &src).await.unwrap();
        s3.put_file("snapshots/2/9/nested/b", &src).await.unwrap();
        s3.put_file("snapshots/2/90/c", &src).await.unwrap();

        assert_eq!(s3.delete_prefix("snapshots/2/9").await.unwrap(), 2);
        assert!(s3.exists("snapshots/2/90/c").await.unwrap());
        assert_eq!(s3.delete_prefix("snapshots/2/9").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let dir = tempdir().unwrap();
        let err = storage(None)
            .get_to_file("nope", &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
