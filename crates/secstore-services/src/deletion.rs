//! Removal of templates, volumes and snapshots from their store

use crate::layout::{dir_for, relative_to, resolve_within};
use secstore_core::constants::MONITOR_DIR;
use secstore_core::models::DataObject;
use secstore_core::{AppError, StoreDescriptor};
use secstore_infra::MountManager;
use secstore_storage::StorageProvider;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What a delete actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deleted {
    /// Directory or file removed; carries the store-relative path.
    Removed(String),
    /// Object prefix cleared on a remote store.
    Objects(usize),
    /// Nothing was there.
    AlreadyGone,
}

#[derive(Clone)]
pub struct DeletionService {
    mounts: Arc<MountManager>,
    storage: Arc<dyn StorageProvider>,
}

impl DeletionService {
    pub fn new(mounts: Arc<MountManager>, storage: Arc<dyn StorageProvider>) -> Self {
        DeletionService { mounts, storage }
    }

    pub async fn delete(
        &self,
        object: &DataObject,
        store: &StoreDescriptor,
    ) -> Result<Deleted, AppError> {
        let relative = object_location(object);

        if store.is_object_store() {
            return self.delete_remote(object, store, &relative).await;
        }

        let root = self.mounts.resolve(store).await?;
        let target = resolve_within(&root, &relative)?;
        let is_snapshot = object.is_snapshot();

        let outcome = tokio::task::spawn_blocking(move || remove_local(&root, &target, is_snapshot))
            .await
            .map_err(|e| AppError::Internal(format!("delete task failed: {}", e)))??;

        match &outcome {
            Deleted::AlreadyGone => tracing::info!(
                kind = %object.kind,
                id = object.id,
                path = %relative,
                "Object already absent"
            ),
            _ => tracing::info!(
                kind = %object.kind,
                id = object.id,
                path = %relative,
                "Object deleted"
            ),
        }
        Ok(outcome)
    }

    async fn delete_remote(
        &self,
        object: &DataObject,
        store: &StoreDescriptor,
        relative: &str,
    ) -> Result<Deleted, AppError> {
        let backend = self.storage.open(store)?;
        let is_file_key = !relative.is_empty() && backend.exists(relative).await?;

        // Snapshots share their prefix with sibling snapshots.
        if object.is_snapshot() && is_file_key {
            backend.delete(relative).await?;
            tracing::info!(
                kind = %object.kind,
                id = object.id,
                store = %store,
                key = %relative,
                "Snapshot deleted from object store"
            );
            return Ok(Deleted::Objects(1));
        }

        let prefix = if is_file_key || Path::new(relative).extension().is_some() {
            parent_key(relative).ok_or_else(|| {
                AppError::InvalidInput(format!("refusing to delete store root for {}", relative))
            })?
        } else {
            relative.to_string()
        };
        if prefix.is_empty() {
            return Err(AppError::InvalidInput(
                "refusing to delete store root".to_string(),
            ));
        }

        let removed = backend.delete_prefix(&prefix).await?;
        tracing::info!(
            kind = %object.kind,
            id = object.id,
            store = %store,
            prefix = %prefix,
            removed,
            "Object deleted from object store"
        );
        if removed == 0 {
            Ok(Deleted::AlreadyGone)
        } else {
            Ok(Deleted::Objects(removed))
        }
    }
}

/// Key of the directory holding `key`, `None` at the store root.
fn parent_key(key: &str) -> Option<String> {
    key.rsplit_once('/')
        .map(|(parent, _)| parent.to_string())
        .filter(|parent| !parent.is_empty())
}

/// Store-relative location of an object: its recorded path, or the
/// canonical directory when none was recorded.
pub fn object_location(object: &DataObject) -> String {
    let path = object.path.trim().trim_matches('/');
    if path.is_empty() {
        dir_for(object).to_string_lossy().replace('\\', "/")
    } else {
        path.to_string()
    }
}

fn remove_local(root: &Path, target: &Path, is_snapshot: bool) -> Result<Deleted, AppError> {
    let metadata = match std::fs::symlink_metadata(target) {
        Ok(m) => Some(m),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    // A snapshot path names one file in a directory shared with its siblings.
    if is_snapshot {
        if let Some(m) = &metadata {
            if m.is_file() {
                std::fs::remove_file(target)?;
                if let Some(parent) = target.parent() {
                    let _ = std::fs::remove_dir(parent);
                }
                return Ok(Deleted::Removed(relative_to(root, target)));
            }
        }
    }

    // A missing path is only traced back to its parent when it names a file.
    let dir: PathBuf = match &metadata {
        Some(m) if m.is_dir() => target.to_path_buf(),
        None if target.extension().is_none() => return Ok(Deleted::AlreadyGone),
        _ => match target.parent() {
            Some(parent) => parent.to_path_buf(),
            None => return Ok(Deleted::AlreadyGone),
        },
    };

    if dir == root || !dir.starts_with(root) {
        return Err(AppError::InvalidInput(format!(
            "refusing to delete store root for {}",
            target.display()
        )));
    }

    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Deleted::AlreadyGone),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if entry.file_name() == MONITOR_DIR {
                std::fs::remove_dir_all(&path)?;
            }
        } else {
            std::fs::remove_file(&path)?;
        }
    }

    std::fs::remove_dir(&dir).map_err(|e| {
        AppError::Storage(format!("unable to remove {}: {}", dir.display(), e))
    })?;

    Ok(Deleted::Removed(relative_to(root, &dir)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secstore_core::models::{ImageFormat, ObjectKind};
    use secstore_infra::SystemCommandRunner;
    use secstore_storage::{ObjectStorage, S3Storage, StorageResult};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct FixedProvider(Arc<dyn ObjectStorage>);

    impl StorageProvider for FixedProvider {
        fn open(&self, _store: &StoreDescriptor) -> StorageResult<Arc<dyn ObjectStorage>> {
            Ok(self.0.clone())
        }
    }

    fn service(storage: Arc<dyn ObjectStorage>) -> (TempDir, DeletionService, StoreDescriptor) {
        let dir = tempdir().unwrap();
        let mounts = Arc::new(MountManager::new(
            dir.path().join("mnt"),
            dir.path().join("mounts"),
            "mount".to_string(),
            None,
            Duration::from_secs(1),
            Arc::new(SystemCommandRunner),
        ));
        let store = StoreDescriptor::Local {
            path: dir.path().join("store"),
        };
        (
            dir,
            DeletionService::new(mounts, Arc::new(FixedProvider(storage))),
            store,
        )
    }

    fn in_memory() -> Arc<dyn ObjectStorage> {
        Arc::new(S3Storage::with_store(
            Arc::new(object_store::memory::InMemory::new()),
            "bucket".to_string(),
            None,
        ))
    }

    fn object(kind: ObjectKind, path: &str) -> DataObject {
        DataObject {
            kind,
            id: 201,
            name: "tmpl".to_string(),
            path: path.to_string(),
            format: ImageFormat::Qcow2,
            physical_size: 0,
            virtual_size: 0,
            account_id: 2,
            hypervisor: None,
            checksum: None,
            volume_id: None,
        }
    }

    #[tokio::test]
    async fn test_delete_template_directory_with_monitor_artifacts() {
        let (dir, service, store) = service(in_memory());
        let tmpl = dir.path().join("store/template/tmpl/2/201");
        std::fs::create_dir_all(tmpl.join(MONITOR_DIR)).unwrap();
        std::fs::write(tmpl.join("a.qcow2"), b"x").unwrap();
        std::fs::write(tmpl.join("template.properties"), b"id=201").unwrap();
        std::fs::write(tmpl.join(MONITOR_DIR).join("hb"), b"1").unwrap();

        let outcome = service
            .delete(&object(ObjectKind::Template, "template/tmpl/2/201/a.qcow2"), &store)
            .await
            .unwrap();
        assert_eq!(outcome, Deleted::Removed("template/tmpl/2/201".to_string()));
        assert!(!tmpl.exists());
    }

    #[tokio::test]
    async fn test_delete_missing_directory_is_success() {
        let (_dir, service, store) = service(in_memory());
        let outcome = service
            .delete(&object(ObjectKind::Template, ""), &store)
            .await
            .unwrap();
        assert_eq!(outcome, Deleted::AlreadyGone);
    }

    #[tokio::test]
    async fn test_delete_snapshot_keeps_siblings() {
        let (dir, service, store) = service(in_memory());
        let snaps = dir.path().join("store/snapshots/2/9");
        std::fs::create_dir_all(&snaps).unwrap();
        std::fs::write(snaps.join("s1"), b"x").unwrap();
        std::fs::write(snaps.join("s2"), b"y").unwrap();

        service
            .delete(&object(ObjectKind::Snapshot, "snapshots/2/9/s1"), &store)
            .await
            .unwrap();
        assert!(!snaps.join("s1").exists());
        assert!(snaps.join("s2").exists());
    }

    #[tokio::test]
    async fn test_delete_refuses_paths_outside_store() {
        let (_dir, service, store) = service(in_memory());
        assert!(service
            .delete(&object(ObjectKind::Volume, "../../etc"), &store)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_delete_from_object_store_by_prefix() {
        let storage = in_memory();
        let (dir, service, _) = service(storage.clone());
        let file = dir.path().join("f");
        std::fs::write(&file, b"abc").unwrap();
        storage.put_file("volumes/2/201/a.img", &file).await.unwrap();
        storage.put_file("volumes/2/201/volume.properties", &file).await.unwrap();

        let s3 = StoreDescriptor::S3 {
            bucket: "bucket".to_string(),
            region: None,
            endpoint: None,
            access_key: "k".to_string(),
            secret_key: "s".to_string(),
            prefix: None,
        };
        let outcome = service
            .delete(&object(ObjectKind::Volume, ""), &s3)
            .await
            .unwrap();
        assert_eq!(outcome, Deleted::Objects(2));
        assert!(storage.list("volumes/2/201").await.unwrap().is_empty());
    }

    fn s3_store() -> StoreDescriptor {
        StoreDescriptor::S3 {
            bucket: "bucket".to_string(),
            region: None,
            endpoint: None,
            access_key: "k".to_string(),
            secret_key: "s".to_string(),
            prefix: None,
        }
    }

    #[tokio::test]
    async fn test_delete_from_object_store_by_file_key() {
        let storage = in_memory();
        let (dir, service, _) = service(storage.clone());
        let file = dir.path().join("f");
        std::fs::write(&file, b"abc").unwrap();
        storage.put_file("template/tmpl/2/201/disk.qcow2", &file).await.unwrap();
        storage
            .put_file("template/tmpl/2/201/template.properties", &file)
            .await
            .unwrap();
        storage.put_file("template/tmpl/2/202/other.qcow2", &file).await.unwrap();

        let outcome = service
            .delete(
                &object(ObjectKind::Template, "template/tmpl/2/201/disk.qcow2"),
                &s3_store(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, Deleted::Objects(2));
        assert!(storage.list("template/tmpl/2/201").await.unwrap().is_empty());
        assert!(storage.exists("template/tmpl/2/202/other.qcow2").await.unwrap());

        let again = service
            .delete(
                &object(ObjectKind::Template, "template/tmpl/2/201/disk.qcow2"),
                &s3_store(),
            )
            .await
            .unwrap();
        assert_eq!(again, Deleted::AlreadyGone);
    }

    #[tokio::test]
    async fn test_delete_snapshot_from_object_store_keeps_siblings() {
        let storage = in_memory();
        let (dir, service, _) = service(storage.clone());
        let file = dir.path().join("f");
        std::fs::write(&file, b"abc").unwrap();
        storage.put_file("snapshots/2/9/s1", &file).await.unwrap();
        storage.put_file("snapshots/2/9/s2", &file).await.unwrap();

        let outcome = service
            .delete(&object(ObjectKind::Snapshot, "snapshots/2/9/s1"), &s3_store())
            .await
            .unwrap();

        assert_eq!(outcome, Deleted::Objects(1));
        assert!(!storage.exists("snapshots/2/9/s1").await.unwrap());
        assert!(storage.exists("snapshots/2/9/s2").await.unwrap());
    }

    #[tokio::test]
    async fn test_object_store_file_key_at_root_is_refused() {
        let (_dir, service, _) = service(in_memory());
        let result = service
            .delete(&object(ObjectKind::Template, "disk.qcow2"), &s3_store())
            .await;
        assert!(result.is_err());
    }
}
