//! Data Mover
//!
//! Copies templates, volumes and snapshots between stores. The strategy is
//! picked from the (source backend, destination backend, object kind) triple,
//! evaluated in this order:
//!
//! 1. filesystem to filesystem, same kind: directory or file copy
//! 2. snapshot to template: hypervisor-specific conversion
//! 3. filesystem to object store: chunked put, optionally staged through a
//!    cache store
//! 4. object store to filesystem: download into a fresh directory
//!
//! Templates and volumes are post-processed (decompressed, unpacked) and
//! measured after every copy, so reported sizes describe the final artifact.

use crate::checksum::{compute_checksum, ChecksumAlgorithm};
use crate::deletion::object_location;
use crate::download::UrlDownloader;
use crate::handoff::{handoff, HandoffWorker};
use crate::install::{discard_install, finalize_in_place, install_image, InstallRequest, Placement};
use crate::layout::{dir_for, relative_to, resolve_within};
use secstore_core::constants::{TEMPLATE_PROPERTIES, VOLUME_PROPERTIES};
use secstore_core::models::{DataObject, Hypervisor, ObjectKind};
use secstore_core::{AppError, StoreDescriptor};
use secstore_infra::{size_proportional_timeout, CommandRunner, MountManager};
use secstore_processing::ProcessorSet;
use secstore_storage::{ObjectStorage, StorageProvider};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use walkdir::WalkDir;

/// Bounds for work whose duration scales with the data size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessTimeouts {
    pub floor_secs: u64,
    pub per_gb_secs: u64,
}

impl ProcessTimeouts {
    pub fn for_size(&self, bytes: u64) -> Duration {
        size_proportional_timeout(bytes, self.floor_secs, self.per_gb_secs)
    }
}

impl Default for ProcessTimeouts {
    fn default() -> Self {
        ProcessTimeouts {
            floor_secs: 300,
            per_gb_secs: 120,
        }
    }
}

/// Result of a URL download installed into a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedImage {
    pub object: DataObject,
    pub checksum: String,
}

pub struct DataMover {
    mounts: Arc<MountManager>,
    storage: Arc<dyn StorageProvider>,
    processors: Arc<ProcessorSet>,
    runner: Arc<dyn CommandRunner>,
    downloader: UrlDownloader,
    snapshot_helper: Option<PathBuf>,
    timeouts: ProcessTimeouts,
}

impl DataMover {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mounts: Arc<MountManager>,
        storage: Arc<dyn StorageProvider>,
        processors: Arc<ProcessorSet>,
        runner: Arc<dyn CommandRunner>,
        downloader: UrlDownloader,
        snapshot_helper: Option<PathBuf>,
        timeouts: ProcessTimeouts,
    ) -> Self {
        DataMover {
            mounts,
            storage,
            processors,
            runner,
            downloader,
            snapshot_helper,
            timeouts,
        }
    }

    /// Copy `src` from `src_store` to `dest_store`, returning `dest` with its
    /// resulting path and sizes. Nothing is returned unless every step
    /// succeeded.
    pub async fn copy(
        &self,
        src: &DataObject,
        src_store: &StoreDescriptor,
        dest: &DataObject,
        dest_store: &StoreDescriptor,
        cache_store: Option<&StoreDescriptor>,
    ) -> Result<DataObject, AppError> {
        let start = std::time::Instant::now();
        let result = if src_store.is_filesystem()
            && dest_store.is_filesystem()
            && src.kind == dest.kind
        {
            self.copy_filesystem(src, src_store, dest, dest_store).await
        } else if src.is_snapshot() && dest.kind == ObjectKind::Template {
            self.snapshot_to_template(src, src_store, dest, dest_store, cache_store)
                .await
        } else if src_store.is_filesystem() && dest_store.is_object_store() {
            self.copy_to_object_store(src, src_store, dest, dest_store, cache_store)
                .await
        } else if src_store.is_object_store() && dest_store.is_filesystem() {
            self.copy_from_object_store(src, src_store, dest, dest_store)
                .await
        } else {
            Err(AppError::InvalidInput(format!(
                "unsupported copy of {} from {} store to {} {} on {} store",
                src.kind,
                src_store.kind(),
                dest.kind,
                dest.id,
                dest_store.kind()
            )))
        };

        match &result {
            Ok(object) => tracing::info!(
                kind = %dest.kind,
                id = dest.id,
                src_store = %src_store,
                dest_store = %dest_store,
                path = %object.path,
                size_bytes = object.physical_size,
                virtual_size = object.virtual_size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Copy successful"
            ),
            Err(e) => tracing::error!(
                kind = %dest.kind,
                id = dest.id,
                src_store = %src_store,
                dest_store = %dest_store,
                error = %e,
                "Copy failed"
            ),
        }
        result
    }

    /// Fetch an `http(s)` URL into `object`'s canonical directory on `store`.
    pub async fn download_url(
        &self,
        object: &DataObject,
        store: &StoreDescriptor,
        url: &str,
        checksum: Option<&str>,
    ) -> Result<DownloadedImage, AppError> {
        let root = self.filesystem_root(store).await?;
        let dir = root.join(dir_for(object));
        tokio::fs::create_dir_all(&dir).await?;
        let staged = dir.join(format!(".{}.part", Uuid::new_v4()));

        let written = self.downloader.download(url, &staged, checksum).await?;

        let processors = self.processors.clone();
        let owned = object.clone();
        let checksum = checksum.map(str::to_lowercase);
        let installed = self
            .blocking(self.timeouts.for_size(written), move |worker| {
                let digest = match checksum {
                    Some(digest) => digest,
                    None => compute_checksum(&staged, ChecksumAlgorithm::Sha256)?,
                };
                let mut request = InstallRequest::for_object(&owned, Placement::Move);
                request.checksum = Some(&digest);
                let result = worker
                    .ensure_wanted()
                    .and_then(|()| install_image(&root, &staged, &request, &processors));
                if result.is_err() {
                    let _ = std::fs::remove_file(&staged);
                }
                let installed = result?;

                let install_path = installed.install_path.clone();
                let kind = owned.kind;
                worker.finish(move || discard_install(&root, &install_path, kind))?;
                Ok((installed, digest))
            })
            .await?;

        let (installed, digest) = installed;
        Ok(DownloadedImage {
            object: object.with_result(
                installed.install_path,
                installed.physical_size,
                installed.virtual_size,
            ),
            checksum: digest,
        })
    }

    async fn filesystem_root(&self, store: &StoreDescriptor) -> Result<PathBuf, AppError> {
        Ok(self.mounts.resolve(store).await?)
    }

    /// Case 1: both stores are mounted filesystems.
    async fn copy_filesystem(
        &self,
        src: &DataObject,
        src_store: &StoreDescriptor,
        dest: &DataObject,
        dest_store: &StoreDescriptor,
    ) -> Result<DataObject, AppError> {
        let src_root = self.filesystem_root(src_store).await?;
        let dest_root = self.filesystem_root(dest_store).await?;
        let src_path = resolve_within(&src_root, &object_location(src))?;
        let dest_dir = dest_root.join(dir_for(dest));

        if !tokio::fs::try_exists(&src_path).await? {
            return Err(AppError::NotFound(format!(
                "{} {} not found at {}",
                src.kind,
                src.id,
                src_path.display()
            )));
        }

        refuse_store_root(&src_root, &src_path)?;

        let size = path_size(&src_path);
        let processors = self.processors.clone();
        let dest_object = dest.clone();
        self.blocking(self.timeouts.for_size(size), move |worker| {
            worker.ensure_wanted()?;
            let artifact = if src_path.is_dir() {
                ensure_disjoint(&src_path, &dest_dir)?;
                copy_tree(&src_path, &dest_dir)?;
                primary_file(&dest_dir)?
            } else if dest_object.is_snapshot() {
                copy_files(&[src_path.clone()], &dest_dir)?;
                dest_dir.join(file_name_of(&src_path))
            } else {
                match src_path.parent().filter(|dir| *dir != src_root.as_path()) {
                    Some(src_dir) => {
                        ensure_disjoint(src_dir, &dest_dir)?;
                        copy_tree(src_dir, &dest_dir)?;
                    }
                    None => {
                        copy_files(&companions(&src_root, &src_path)?, &dest_dir)?;
                    }
                }
                dest_dir.join(file_name_of(&src_path))
            };
            let copied = describe_copy(&dest_root, &artifact, &dest_object, &processors);
            publish(worker, &dest_root, copied)
        })
        .await
    }

    /// Case 2: materialize a template from a snapshot.
    async fn snapshot_to_template(
        &self,
        src: &DataObject,
        src_store: &StoreDescriptor,
        dest: &DataObject,
        dest_store: &StoreDescriptor,
        cache_store: Option<&StoreDescriptor>,
    ) -> Result<DataObject, AppError> {
        if !src_store.is_filesystem() {
            return Err(AppError::InvalidInput(format!(
                "snapshot {} must be on a filesystem store to become a template",
                src.id
            )));
        }

        if dest_store.is_object_store() {
            let cache = cache_store.ok_or_else(|| {
                AppError::InvalidInput(format!(
                    "template {} on {} store needs a cache store",
                    dest.id,
                    dest_store.kind()
                ))
            })?;
            let staged = self.convert_snapshot(src, src_store, dest, cache).await?;
            return self.push_staged(&staged, cache, dest, dest_store).await;
        }

        self.convert_snapshot(src, src_store, dest, dest_store).await
    }

    /// Snapshot to template where both sides are filesystems.
    async fn convert_snapshot(
        &self,
        src: &DataObject,
        src_store: &StoreDescriptor,
        dest: &DataObject,
        dest_store: &StoreDescriptor,
    ) -> Result<DataObject, AppError> {
        let src_root = self.filesystem_root(src_store).await?;
        let dest_root = self.filesystem_root(dest_store).await?;
        let src_path = resolve_within(&src_root, &object_location(src))?;
        if !src_path.is_file() {
            return Err(AppError::NotFound(format!(
                "snapshot file {} not found",
                src_path.display()
            )));
        }
        let size = path_size(&src_path);
        let timeout = self.timeouts.for_size(size);

        let hypervisor = src.hypervisor.or(dest.hypervisor).unwrap_or(Hypervisor::Kvm);
        if hypervisor == Hypervisor::Xen {
            let helper = self.snapshot_helper.as_ref().ok_or_else(|| {
                AppError::Config("no snapshot conversion helper is configured".to_string())
            })?;
            let dest_dir = dest_root.join(dir_for(dest));
            tokio::fs::create_dir_all(&dest_dir).await?;
            let target = dest_dir.join(format!("{}.{}", Uuid::new_v4(), dest.format.extension()));
            let args = vec![
                src_path.display().to_string(),
                target.display().to_string(),
            ];
            self.runner
                .run_checked(&helper.display().to_string(), &args, timeout)
                .await?;
            if !target.is_file() {
                return Err(AppError::Process(format!(
                    "{} did not produce {}",
                    helper.display(),
                    target.display()
                )));
            }

            let processors = self.processors.clone();
            let dest_object = dest.clone();
            return self
                .blocking(timeout, move |worker| {
                    if let Err(e) = worker.ensure_wanted() {
                        let _ = std::fs::remove_file(&target);
                        return Err(e);
                    }
                    let converted = describe_copy(&dest_root, &target, &dest_object, &processors);
                    publish(worker, &dest_root, converted)
                })
                .await;
        }

        let processors = self.processors.clone();
        let dest_object = dest.clone();
        self.blocking(timeout, move |worker| {
            worker.ensure_wanted()?;
            let request = InstallRequest::for_object(&dest_object, Placement::Copy);
            let installed = install_image(&dest_root, &src_path, &request, &processors)?;
            let converted = dest_object.with_result(
                installed.install_path,
                installed.physical_size,
                installed.virtual_size,
            );
            publish(worker, &dest_root, Ok(converted))
        })
        .await
    }

    /// Case 3: push a filesystem object to an object store.
    async fn copy_to_object_store(
        &self,
        src: &DataObject,
        src_store: &StoreDescriptor,
        dest: &DataObject,
        dest_store: &StoreDescriptor,
        cache_store: Option<&StoreDescriptor>,
    ) -> Result<DataObject, AppError> {
        if let Some(cache) = cache_store {
            let mut staging = dest.clone();
            staging.kind = src.kind;
            let staged = self.copy_filesystem(src, src_store, &staging, cache).await?;
            return self.push_staged(&staged, cache, dest, dest_store).await;
        }

        let src_root = self.filesystem_root(src_store).await?;
        let src_path = resolve_within(&src_root, &object_location(src))?;
        refuse_store_root(&src_root, &src_path)?;
        let processors = self.processors.clone();
        let probe_path = src_path.clone();
        let declared = src.format;
        let (artifact, physical, virtual_size) = self
            .blocking(self.timeouts.for_size(path_size(&src_path)), move |_| {
                let artifact = if probe_path.is_dir() {
                    primary_file(&probe_path)?
                } else {
                    probe_path
                };
                let found = processors.probe_expecting(&artifact, declared)?;
                Ok((artifact, found.physical_size, found.virtual_size))
            })
            .await?;

        let backend = self.storage.open(dest_store)?;
        let files = if src_path.is_dir() || !src.is_snapshot() {
            companions(&src_root, &artifact)?
        } else {
            vec![artifact.clone()]
        };
        let dest_prefix = object_location(dest);
        let main_key = upload_files(
            backend.as_ref(),
            &files,
            &artifact,
            &dest_prefix,
        )
        .await?;

        Ok(dest.with_result(main_key, physical, virtual_size))
    }

    /// Upload an object staged on `cache`, then drop the staged copy.
    async fn push_staged(
        &self,
        staged: &DataObject,
        cache: &StoreDescriptor,
        dest: &DataObject,
        dest_store: &StoreDescriptor,
    ) -> Result<DataObject, AppError> {
        let cache_root = self.filesystem_root(cache).await?;
        let artifact = resolve_within(&cache_root, &staged.path)?;
        let files = if staged.is_snapshot() {
            vec![artifact.clone()]
        } else {
            files_in(artifact.parent().unwrap_or(&cache_root))?
        };

        let backend = self.storage.open(dest_store)?;
        let main_key = upload_files(backend.as_ref(), &files, &artifact, &object_location(dest))
            .await
            .map_err(|e| {
                tracing::error!(
                    staged = %artifact.display(),
                    error = %e,
                    "Upload from cache failed; staged copy kept"
                );
                e
            })?;

        let cleanup = if staged.is_snapshot() {
            tokio::fs::remove_file(&artifact).await
        } else {
            match artifact.parent() {
                Some(dir) if dir != cache_root => tokio::fs::remove_dir_all(dir).await,
                _ => Ok(()),
            }
        };
        if let Err(e) = cleanup {
            tracing::warn!(staged = %artifact.display(), error = %e, "Failed to remove staged copy");
        }

        Ok(dest.with_result(main_key, staged.physical_size, staged.virtual_size))
    }

    /// Case 4: pull from an object store into a filesystem store.
    async fn copy_from_object_store(
        &self,
        src: &DataObject,
        src_store: &StoreDescriptor,
        dest: &DataObject,
        dest_store: &StoreDescriptor,
    ) -> Result<DataObject, AppError> {
        let backend = self.storage.open(src_store)?;
        let dest_root = self.filesystem_root(dest_store).await?;
        let dest_dir = dest_root.join(dir_for(dest));
        tokio::fs::create_dir_all(&dest_dir).await?;

        let key = object_location(src);
        let mut downloaded = Vec::new();
        if backend.exists(&key).await? {
            let target = dest_dir.join(file_name_of(Path::new(&key)));
            backend.get_to_file(&key, &target).await?;
            downloaded.push(target);
        } else {
            let prefix = format!("{}/", key.trim_end_matches('/'));
            let entries = backend.list(&key).await?;
            if entries.is_empty() {
                return Err(AppError::NotFound(format!("{} {} has no objects under {}", src.kind, src.id, key)));
            }
            for entry in entries {
                let relative = entry.key.strip_prefix(&prefix).unwrap_or(&entry.key);
                let target = resolve_within(&dest_dir, relative)?;
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                backend.get_to_file(&entry.key, &target).await?;
                downloaded.push(target);
            }
        }

        let size: u64 = downloaded.iter().map(|p| path_size(p)).sum();
        let processors = self.processors.clone();
        let dest_object = dest.clone();
        self.blocking(self.timeouts.for_size(size), move |worker| {
            worker.ensure_wanted()?;
            let artifact = if downloaded.len() == 1 {
                downloaded.remove(0)
            } else {
                primary_file(&dest_dir)?
            };
            let pulled = describe_copy(&dest_root, &artifact, &dest_object, &processors);
            publish(worker, &dest_root, pulled)
        })
        .await
    }

    /// Run blocking filesystem work off the runtime, bounded by `timeout`.
    /// Work still running when the copy gives up reverts what it wrote
    /// through the [`HandoffWorker`].
    async fn blocking<T, F>(&self, timeout: Duration, work: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&HandoffWorker) -> Result<T, AppError> + Send + 'static,
    {
        let (waiter, worker) = handoff();
        let result = bounded(
            timeout,
            tokio::task::spawn_blocking(move || work(&worker)),
        )
        .await;
        if result.is_ok() {
            waiter.accept();
        }
        result
    }
}

async fn bounded<T, F>(timeout: Duration, task: F) -> Result<T, AppError>
where
    F: Future<Output = Result<Result<T, AppError>, tokio::task::JoinError>>,
{
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(AppError::Internal(format!("copy task failed: {}", e))),
        Err(_) => Err(AppError::Timeout(format!(
            "copy did not finish within {}s",
            timeout.as_secs()
        ))),
    }
}

/// Hand a copied object to the waiting copy, or revert it when that copy
/// already gave up.
fn publish(
    worker: &HandoffWorker,
    dest_root: &Path,
    copied: Result<DataObject, AppError>,
) -> Result<DataObject, AppError> {
    let copied = copied?;
    let root = dest_root.to_path_buf();
    let undo = copied.clone();
    worker.finish(move || discard_copy(&root, &undo))?;
    Ok(copied)
}

/// Remove a copied object: the snapshot file, or the template or volume
/// directory.
fn discard_copy(dest_root: &Path, object: &DataObject) {
    let artifact = dest_root.join(&object.path);
    let removed = if object.is_snapshot() {
        std::fs::remove_file(&artifact)
    } else {
        match artifact.parent() {
            Some(dir) if dir != dest_root && dir.starts_with(dest_root) => {
                std::fs::remove_dir_all(dir)
            }
            _ => std::fs::remove_file(&artifact),
        }
    };
    match removed {
        Ok(()) => tracing::info!(path = %object.path, "Abandoned copy removed"),
        Err(e) => tracing::warn!(path = %object.path, error = %e, "Failed to remove abandoned copy"),
    }
}

/// Post-copy processing: templates and volumes are normalized and described
/// by a sidecar, snapshots are only measured.
fn describe_copy(
    dest_root: &Path,
    artifact: &Path,
    dest: &DataObject,
    processors: &ProcessorSet,
) -> Result<DataObject, AppError> {
    if dest.is_snapshot() {
        let (virtual_size, physical) = processors.sizes_or_physical(artifact)?;
        return Ok(dest.with_result(relative_to(dest_root, artifact), physical, virtual_size));
    }
    let request = InstallRequest::for_object(dest, Placement::Move);
    let installed = finalize_in_place(dest_root, artifact, &request, processors)?;
    Ok(dest.with_result(
        installed.install_path,
        installed.physical_size,
        installed.virtual_size,
    ))
}

async fn upload_files(
    backend: &dyn ObjectStorage,
    files: &[PathBuf],
    artifact: &Path,
    dest_prefix: &str,
) -> Result<String, AppError> {
    let prefix = dest_prefix.trim_end_matches('/');
    let mut main_key = None;
    for file in files {
        let key = format!("{}/{}", prefix, file_name_of(file));
        backend.put_file(&key, file).await?;
        if file == artifact {
            main_key = Some(key);
        }
    }
    main_key.ok_or_else(|| {
        AppError::Internal(format!("{} was not among the uploaded files", artifact.display()))
    })
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn path_size(path: &Path) -> u64 {
    if path.is_dir() {
        crate::layout::dir_size(path).unwrap_or(0)
    } else {
        std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }
}

/// Regular files directly inside `dir`.
fn files_in(dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Files that travel with `artifact`: everything in its directory, or only
/// the artifact and any sidecar when it sits at the store root.
fn companions(store_root: &Path, artifact: &Path) -> Result<Vec<PathBuf>, AppError> {
    match artifact.parent() {
        Some(dir) if dir != store_root => files_in(dir),
        _ => {
            let mut files = vec![artifact.to_path_buf()];
            files.extend(
                [TEMPLATE_PROPERTIES, VOLUME_PROPERTIES]
                    .iter()
                    .map(|sidecar| store_root.join(sidecar))
                    .filter(|path| path.is_file()),
            );
            Ok(files)
        }
    }
}

fn refuse_store_root(store_root: &Path, path: &Path) -> Result<(), AppError> {
    if path == store_root {
        return Err(AppError::InvalidInput(format!(
            "refusing to copy the store root {}",
            store_root.display()
        )));
    }
    Ok(())
}

/// A tree copy must not write into its own source.
fn ensure_disjoint(src: &Path, dest: &Path) -> Result<(), AppError> {
    if dest.starts_with(src) {
        return Err(AppError::InvalidInput(format!(
            "cannot copy {} into {}",
            src.display(),
            dest.display()
        )));
    }
    Ok(())
}

/// Copy `files` flat into `dest`, creating it as needed.
fn copy_files(files: &[PathBuf], dest: &Path) -> Result<u64, AppError> {
    std::fs::create_dir_all(dest)?;
    let mut copied = 0;
    for file in files {
        copied += std::fs::copy(file, dest.join(file_name_of(file)))?;
    }
    Ok(copied)
}

/// Recursive copy of `src` into `dest`, creating `dest` as needed.
fn copy_tree(src: &Path, dest: &Path) -> Result<u64, AppError> {
    std::fs::create_dir_all(dest)?;
    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| AppError::Storage(e.to_string()))?;
        let relative = entry.path().strip_prefix(src).map_err(|e| AppError::Internal(e.to_string()))?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            copied += std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(copied)
}

/// The image file of an object directory: the file its sidecar names, or the
/// largest non-sidecar file.
fn primary_file(dir: &Path) -> Result<PathBuf, AppError> {
    for sidecar in [TEMPLATE_PROPERTIES, VOLUME_PROPERTIES] {
        let path = dir.join(sidecar);
        if let Ok(props) = crate::properties::Properties::read_from(&path) {
            if let Some(name) = props.get("filename") {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }
    }

    files_in(dir)?
        .into_iter()
        .filter(|p| p.extension().and_then(|e| e.to_str()) != Some("properties"))
        .filter_map(|p| std::fs::metadata(&p).ok().map(|m| (p, m.len())))
        .max_by_key(|(_, len)| *len)
        .map(|(p, _)| p)
        .ok_or_else(|| AppError::NotFound(format!("no image file in {}", dir.display())))
}
