//! Layout and sizing constants shared across crates

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Top-level directories of a secondary store.
pub const TEMPLATE_ROOT: &str = "template/tmpl";
pub const VOLUME_ROOT: &str = "volumes";
pub const SNAPSHOT_ROOT: &str = "snapshots";

/// Subdirectories created on every freshly mounted store.
pub const MOUNT_SUBDIRS: [&str; 2] = [SNAPSHOT_ROOT, VOLUME_ROOT];

pub const TEMPLATE_PROPERTIES: &str = "template.properties";
pub const VOLUME_PROPERTIES: &str = "volume.properties";

/// Hypervisor monitoring artifacts left inside object directories.
pub const MONITOR_DIR: &str = ".hamonitor";

pub const DEFAULT_CHECKSUM_ALGORITHM: &str = "sha256";

/// Multipart field name expected for the upload body.
pub const UPLOAD_FILE_FIELD: &str = "file";
