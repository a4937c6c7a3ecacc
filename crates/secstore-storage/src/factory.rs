use crate::{ObjectStorage, S3Storage, StorageError, StorageProvider, StorageResult, SwiftStorage};
use secstore_core::StoreDescriptor;
use std::sync::Arc;

/// Create an object-storage client for a remote store descriptor.
pub fn create_object_storage(store: &StoreDescriptor) -> StorageResult<Arc<dyn ObjectStorage>> {
    match store {
        StoreDescriptor::S3 {
            bucket,
            region,
            endpoint,
            access_key,
            secret_key,
            prefix,
        } => {
            let storage = S3Storage::new(
                bucket.clone(),
                region.clone(),
                endpoint.clone(),
                access_key.clone(),
                secret_key.clone(),
                prefix.clone(),
            )?;
            Ok(Arc::new(storage))
        }

        StoreDescriptor::Swift {
            url,
            account,
            user,
            key,
            container,
        } => {
            let storage = SwiftStorage::new(
                url.clone(),
                account.clone(),
                user.clone(),
                key.clone(),
                container.clone(),
            )?;
            Ok(Arc::new(storage))
        }

        StoreDescriptor::Local { .. } | StoreDescriptor::Nfs { .. } | StoreDescriptor::Cifs { .. } => {
            Err(StorageError::ConfigError(format!(
                "{} store is filesystem-backed and has no object client",
                store.kind()
            )))
        }
    }
}

/// Provider that builds a fresh client per descriptor.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStorageProvider;

impl StorageProvider for DefaultStorageProvider {
    fn open(&self, store: &StoreDescriptor) -> StorageResult<Arc<dyn ObjectStorage>> {
        create_object_storage(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secstore_core::StoreKind;

    #[test]
    fn test_filesystem_stores_have_no_object_client() {
        let store = StoreDescriptor::Nfs {
            url: "nfs://10.0.0.5/export".to_string(),
            nfs_version: None,
        };
        assert!(matches!(
            create_object_storage(&store),
            Err(StorageError::ConfigError(_))
        ));
    }

    #[test]
    fn test_builds_s3_client() {
        let store = StoreDescriptor::S3 {
            bucket: "images".to_string(),
            region: Some("eu-west-1".to_string()),
            endpoint: Some("http://minio:9000".to_string()),
            access_key: "a".to_string(),
            secret_key: "b".to_string(),
            prefix: None,
        };
        let storage = DefaultStorageProvider.open(&store).unwrap();
        assert_eq!(storage.kind(), StoreKind::S3);
    }
}
