//! Install step shared by uploads, URL downloads and snapshot conversion
//!
//! A staged file is given a collision-resistant name, placed in the object's
//! canonical directory, decompressed/unpacked, measured and described by a
//! properties sidecar. Everything here is blocking filesystem work.

use crate::layout::{object_dir, properties_file, relative_to, resolve_within};
use crate::properties::Properties;
use secstore_core::models::{DataObject, ImageFormat, ObjectKind};
use secstore_core::AppError;
use secstore_processing::unpack::{is_gzip, post_process};
use secstore_processing::ProcessorSet;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// How the staged file reaches the install directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Rename (falling back to copy + delete across filesystems).
    Move,
    /// Leave the source untouched.
    Copy,
}

#[derive(Debug, Clone)]
pub struct InstallRequest<'a> {
    pub kind: ObjectKind,
    pub id: u64,
    pub account_id: u64,
    pub volume_id: Option<u64>,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub declared_format: ImageFormat,
    pub checksum: Option<&'a str>,
    /// Store-relative directory overriding the canonical one.
    pub install_dir: Option<&'a str>,
    pub placement: Placement,
}

impl<'a> InstallRequest<'a> {
    /// Request installing into `object`'s canonical directory.
    pub fn for_object(object: &'a DataObject, placement: Placement) -> Self {
        InstallRequest {
            kind: object.kind,
            id: object.id,
            account_id: object.account_id,
            volume_id: object.volume_id,
            name: &object.name,
            description: None,
            declared_format: object.format,
            checksum: object.checksum.as_deref(),
            install_dir: None,
            placement,
        }
    }

    pub fn target_dir(&self) -> PathBuf {
        object_dir(self.kind, self.account_id, self.id, self.volume_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledImage {
    /// Store-relative path of the installed file.
    pub install_path: String,
    pub format: ImageFormat,
    pub physical_size: u64,
    pub virtual_size: u64,
}

/// Install `staged` below `store_root` as described by `request`.
pub fn install_image(
    store_root: &Path,
    staged: &Path,
    request: &InstallRequest<'_>,
    processors: &ProcessorSet,
) -> Result<InstalledImage, AppError> {
    let start = std::time::Instant::now();
    let dir = match request.install_dir {
        Some(custom) => resolve_within(store_root, custom)?,
        None => store_root.join(request.target_dir()),
    };
    std::fs::create_dir_all(&dir)?;

    let mut file_name = format!("{}.{}", Uuid::new_v4(), request.declared_format.extension());
    if is_gzip(staged)? {
        file_name.push_str(".gz");
    }
    let placed = dir.join(&file_name);

    match request.placement {
        Placement::Move => move_file(staged, &placed)?,
        Placement::Copy => {
            std::fs::copy(staged, &placed)?;
        }
    }

    match finalize_in_place(store_root, &placed, request, processors) {
        Ok(installed) => {
            tracing::info!(
                kind = %request.kind,
                id = request.id,
                install_path = %installed.install_path,
                format = %installed.format,
                size_bytes = installed.physical_size,
                virtual_size = installed.virtual_size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Image installed"
            );
            Ok(installed)
        }
        Err(e) => {
            let _ = std::fs::remove_file(&placed);
            tracing::error!(
                kind = %request.kind,
                id = request.id,
                error = %e,
                "Image install failed"
            );
            Err(e)
        }
    }
}

/// Post-process, measure and describe a file that already sits in its
/// install directory. The sidecar is (re)written next to the final artifact.
pub fn finalize_in_place(
    store_root: &Path,
    placed: &Path,
    request: &InstallRequest<'_>,
    processors: &ProcessorSet,
) -> Result<InstalledImage, AppError> {
    let artifact = post_process(placed)?;
    let dir = artifact.parent().unwrap_or(store_root);
    let found = processors.probe_expecting(&artifact, request.declared_format)?;
    let file_name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if let Some(sidecar) = properties_file(request.kind) {
        Properties::for_image(
            request.id,
            request.name,
            &file_name,
            request.description,
            request.checksum,
            found.format,
            found.physical_size,
            found.virtual_size,
        )
        .write_to(&dir.join(sidecar))?;
    }

    Ok(InstalledImage {
        install_path: relative_to(store_root, &artifact),
        format: found.format,
        physical_size: found.physical_size,
        virtual_size: found.virtual_size.max(found.physical_size),
    })
}

/// Remove an installed artifact and the sidecar next to it, then the
/// directory when nothing else is left in it.
pub fn discard_install(store_root: &Path, install_path: &str, kind: ObjectKind) {
    let artifact = store_root.join(install_path);
    let _ = std::fs::remove_file(&artifact);
    if let Some(dir) = artifact.parent().filter(|dir| *dir != store_root) {
        if let Some(sidecar) = properties_file(kind) {
            let _ = std::fs::remove_file(dir.join(sidecar));
        }
        let _ = std::fs::remove_dir(dir);
    }
    tracing::info!(install_path = %install_path, "Installed image discarded");
}

/// Rename, or copy and remove when source and target are on different
/// filesystems.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}
