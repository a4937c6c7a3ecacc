use std::fmt::{Display, Formatter, Result as FmtResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::data_object::{Hypervisor, ImageFormat, ObjectKind};
use crate::storage_types::StoreDescriptor;

/// Lifecycle of one upload id: `Created -> InProgress -> {Completed | Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Created,
    InProgress,
    Completed,
    Error,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Completed | UploadState::Error)
    }
}

impl Display for UploadState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UploadState::Created => write!(f, "created"),
            UploadState::InProgress => write!(f, "in_progress"),
            UploadState::Completed => write!(f, "completed"),
            UploadState::Error => write!(f, "error"),
        }
    }
}

/// Parameters carried, encrypted, in the `x-metadata` header of an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadParams {
    pub resource_type: ObjectKind,
    pub id: u64,
    pub name: String,
    pub format: ImageFormat,
    pub account_id: u64,
    /// Filesystem store the upload lands on.
    pub store: StoreDescriptor,
    /// Relative install directory; the canonical layout is used when absent.
    #[serde(default)]
    pub install_path_prefix: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    pub max_upload_size_gb: u64,
    /// Account secondary-storage quota. `None` means unlimited.
    #[serde(default)]
    pub account_quota_gb: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hypervisor: Option<Hypervisor>,
}

/// Server-side record of one client upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEntity {
    pub upload_id: String,
    pub state: UploadState,
    pub resource_type: Option<ObjectKind>,
    pub format: Option<ImageFormat>,
    pub content_length: u64,
    pub checksum: Option<String>,
    pub max_size_gb: u64,
    pub account_id: Option<u64>,
    /// Absolute install directory once known.
    pub install_dir: Option<std::path::PathBuf>,
    /// Install path relative to the store root, set on completion.
    pub install_path: Option<String>,
    pub message: Option<String>,
    pub physical_size: Option<u64>,
    pub virtual_size: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl UploadEntity {
    pub fn new(upload_id: impl Into<String>) -> Self {
        UploadEntity {
            upload_id: upload_id.into(),
            state: UploadState::Created,
            resource_type: None,
            format: None,
            content_length: 0,
            checksum: None,
            max_size_gb: 0,
            account_id: None,
            install_dir: None,
            install_path: None,
            message: None,
            physical_size: None,
            virtual_size: None,
            created_at: Utc::now(),
        }
    }
}

/// What a status query reports about an upload id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStatusReport {
    pub upload_id: String,
    /// `unknown`, `created`, `in_progress`, `completed` or `error`.
    pub status: String,
    pub percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl UploadStatusReport {
    pub fn unknown(upload_id: impl Into<String>) -> Self {
        UploadStatusReport {
            upload_id: upload_id.into(),
            status: "unknown".to_string(),
            percent: 0,
            install_path: None,
            physical_size: None,
            virtual_size: None,
            message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!UploadState::Created.is_terminal());
        assert!(!UploadState::InProgress.is_terminal());
        assert!(UploadState::Completed.is_terminal());
        assert!(UploadState::Error.is_terminal());
    }

    #[test]
    fn test_params_defaults() {
        let json = r#"{
            "resource_type": "template",
            "id": 201,
            "name": "centos",
            "format": "qcow2",
            "account_id": 2,
            "store": {"kind": "local", "path": "/tmp/store"},
            "max_upload_size_gb": 10
        }"#;
        let params: UploadParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.account_quota_gb, None);
        assert_eq!(params.install_path_prefix, None);
        assert_eq!(params.format, ImageFormat::Qcow2);
    }
}
