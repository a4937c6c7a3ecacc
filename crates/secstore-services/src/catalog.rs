//! Template and volume listings built from properties sidecars

use crate::properties::Properties;
use secstore_core::constants::{TEMPLATE_PROPERTIES, TEMPLATE_ROOT, VOLUME_PROPERTIES, VOLUME_ROOT};
use secstore_core::models::{CatalogEntry, ObjectKind};
use secstore_core::AppError;
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

/// Every template or volume found under `store_root`, keyed by unique name.
/// Directories whose sidecar is unreadable are skipped with a warning.
pub fn list_catalog(
    store_root: &Path,
    kind: ObjectKind,
) -> Result<BTreeMap<String, CatalogEntry>, AppError> {
    let (root, sidecar) = match kind {
        ObjectKind::Template => (TEMPLATE_ROOT, TEMPLATE_PROPERTIES),
        ObjectKind::Volume => (VOLUME_ROOT, VOLUME_PROPERTIES),
        ObjectKind::Snapshot => {
            return Err(AppError::InvalidInput(
                "snapshots are not listed from properties".to_string(),
            ))
        }
    };

    let base = store_root.join(root);
    let mut entries = BTreeMap::new();
    if !base.exists() {
        return Ok(entries);
    }

    for entry in WalkDir::new(&base).min_depth(1).max_depth(3) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable catalog entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || entry.file_name() != sidecar {
            continue;
        }

        let dir = entry
            .path()
            .parent()
            .and_then(|p| p.strip_prefix(store_root).ok())
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();

        match Properties::read_from(entry.path()) {
            Ok(props) => match props.to_catalog_entry(&dir) {
                Some(item) => {
                    entries.insert(item.name.clone(), item);
                }
                None => tracing::warn!(path = %entry.path().display(), "Sidecar has no filename"),
            },
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "Failed to read sidecar")
            }
        }
    }

    tracing::debug!(kind = %kind, count = entries.len(), "Catalog listed");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secstore_core::models::ImageFormat;
    use tempfile::tempdir;

    #[test]
    fn test_lists_templates_by_unique_name() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        for (account, id, name) in [(2, 201, "centos"), (3, 301, "debian")] {
            let path = root.join(format!("template/tmpl/{}/{}", account, id));
            std::fs::create_dir_all(&path).unwrap();
            Properties::for_image(
                id,
                name,
                "disk.qcow2",
                None,
                None,
                ImageFormat::Qcow2,
                10,
                20,
            )
            .write_to(&path.join(TEMPLATE_PROPERTIES))
            .unwrap();
        }
        std::fs::create_dir_all(root.join("template/tmpl/4/401")).unwrap();

        let listing = list_catalog(root, ObjectKind::Template).unwrap();
        assert_eq!(listing.len(), 2);
        let centos = &listing["centos"];
        assert_eq!(centos.id, Some(201));
        assert_eq!(centos.path, "template/tmpl/2/201/disk.qcow2");
        assert_eq!(centos.virtual_size, 20);
    }

    #[test]
    fn test_empty_store_lists_nothing() {
        let dir = tempdir().unwrap();
        assert!(list_catalog(dir.path(), ObjectKind::Volume).unwrap().is_empty());
        assert!(list_catalog(dir.path(), ObjectKind::Snapshot).is_err());
    }
}
