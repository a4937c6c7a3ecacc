//! Canonical on-store layout
//!
//! ```text
//! template/tmpl/<account>/<id>/
//! volumes/<account>/<id>/
//! snapshots/<account>/<volume-or-id>/
//! ```

use secstore_core::constants::{
    SNAPSHOT_ROOT, TEMPLATE_PROPERTIES, TEMPLATE_ROOT, VOLUME_PROPERTIES, VOLUME_ROOT,
};
use secstore_core::models::{DataObject, ObjectKind};
use secstore_core::AppError;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Directory (relative to the store root) that holds an object.
pub fn object_dir(kind: ObjectKind, account_id: u64, id: u64, volume_id: Option<u64>) -> PathBuf {
    match kind {
        ObjectKind::Template => Path::new(TEMPLATE_ROOT)
            .join(account_id.to_string())
            .join(id.to_string()),
        ObjectKind::Volume => Path::new(VOLUME_ROOT)
            .join(account_id.to_string())
            .join(id.to_string()),
        ObjectKind::Snapshot => Path::new(SNAPSHOT_ROOT)
            .join(account_id.to_string())
            .join(volume_id.unwrap_or(id).to_string()),
    }
}

pub fn dir_for(object: &DataObject) -> PathBuf {
    object_dir(object.kind, object.account_id, object.id, object.volume_id)
}

/// Sidecar file name for a kind; snapshots carry none.
pub fn properties_file(kind: ObjectKind) -> Option<&'static str> {
    match kind {
        ObjectKind::Template => Some(TEMPLATE_PROPERTIES),
        ObjectKind::Volume => Some(VOLUME_PROPERTIES),
        ObjectKind::Snapshot => None,
    }
}

/// Per-account roots counted against the secondary-storage quota.
pub fn account_roots(account_id: u64) -> [PathBuf; 3] {
    let account = account_id.to_string();
    [
        Path::new(TEMPLATE_ROOT).join(&account),
        Path::new(VOLUME_ROOT).join(&account),
        Path::new(SNAPSHOT_ROOT).join(&account),
    ]
}

/// Bytes used by an account on the store rooted at `store_root`.
pub fn account_usage(store_root: &Path, account_id: u64) -> std::io::Result<u64> {
    let mut total = 0;
    for root in account_roots(account_id) {
        total += dir_size(&store_root.join(root))?;
    }
    Ok(total)
}

/// Total size of regular files below `path`; a missing path counts as zero.
pub fn dir_size(path: &Path) -> std::io::Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let mut total = 0;
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(std::io::Error::other)?.len();
        }
    }
    Ok(total)
}

/// Join a store-relative path onto its root, rejecting anything that would
/// escape the store.
pub fn resolve_within(root: &Path, relative: &str) -> Result<PathBuf, AppError> {
    let relative = Path::new(relative.trim_start_matches("./"));
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(AppError::InvalidInput(format!(
                    "path {} must stay inside its store",
                    relative.display()
                )))
            }
        }
    }
    Ok(root.join(relative))
}

/// Store-relative form of `path`, with `/` separators.
pub fn relative_to(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
