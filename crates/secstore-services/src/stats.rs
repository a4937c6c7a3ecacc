//! Capacity of the filesystem holding a store

use std::path::Path;
use sysinfo::Disks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

/// Total and used bytes of the disk whose mount point is the longest prefix
/// of `path`. `None` when no disk covers it.
pub fn storage_stats(path: &Path) -> Option<StorageStats> {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    let disk = disks
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().components().count())?;

    let total_bytes = disk.total_space();
    let used_bytes = total_bytes.saturating_sub(disk.available_space());

    tracing::debug!(
        path = %path.display(),
        mount_point = %disk.mount_point().display(),
        total_bytes,
        used_bytes,
        "Disk usage"
    );

    Some(StorageStats {
        total_bytes,
        used_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_used_never_exceeds_total() {
        let dir = std::env::temp_dir();
        if let Some(stats) = storage_stats(&dir) {
            assert!(stats.used_bytes <= stats.total_bytes);
        }
    }
}
