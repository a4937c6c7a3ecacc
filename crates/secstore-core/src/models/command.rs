use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::data_object::{CatalogEntry, DataObject};
use super::upload::UploadStatusReport;
use crate::storage_types::StoreDescriptor;

/// Where a `Download` command pulls its bytes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadSource {
    /// An `http(s)` URL, optionally verified against a hex digest.
    Url {
        url: String,
        #[serde(default)]
        checksum: Option<String>,
    },
    /// An object held by another store.
    Object {
        object: DataObject,
        store: StoreDescriptor,
    },
}

/// Typed commands accepted from the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Download {
        store: StoreDescriptor,
        object: DataObject,
        source: DownloadSource,
    },
    Copy {
        src_object: DataObject,
        src_store: StoreDescriptor,
        dest_object: DataObject,
        dest_store: StoreDescriptor,
        #[serde(default)]
        cache_store: Option<StoreDescriptor>,
    },
    Delete {
        object: DataObject,
        store: StoreDescriptor,
    },
    GetStorageStats {
        store: StoreDescriptor,
    },
    ListTemplates {
        store: StoreDescriptor,
    },
    ListVolumes {
        store: StoreDescriptor,
    },
    ComputeChecksum {
        store: StoreDescriptor,
        path: String,
        #[serde(default)]
        algorithm: Option<String>,
    },
    UploadStatus {
        upload_id: String,
    },
    CreateUploadEntity {
        #[serde(default)]
        upload_id: Option<String>,
    },
    CreateEntityDownloadUrl {
        store: StoreDescriptor,
        path: String,
        #[serde(default)]
        link_name: Option<String>,
    },
    DeleteEntityDownloadUrl {
        link_name: String,
    },
}

/// Discriminant of [`Command`], used as the dispatch table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Download,
    Copy,
    Delete,
    GetStorageStats,
    ListTemplates,
    ListVolumes,
    ComputeChecksum,
    UploadStatus,
    CreateUploadEntity,
    CreateEntityDownloadUrl,
    DeleteEntityDownloadUrl,
}

impl CommandKind {
    pub const ALL: [CommandKind; 11] = [
        CommandKind::Download,
        CommandKind::Copy,
        CommandKind::Delete,
        CommandKind::GetStorageStats,
        CommandKind::ListTemplates,
        CommandKind::ListVolumes,
        CommandKind::ComputeChecksum,
        CommandKind::UploadStatus,
        CommandKind::CreateUploadEntity,
        CommandKind::CreateEntityDownloadUrl,
        CommandKind::DeleteEntityDownloadUrl,
    ];
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Download { .. } => CommandKind::Download,
            Command::Copy { .. } => CommandKind::Copy,
            Command::Delete { .. } => CommandKind::Delete,
            Command::GetStorageStats { .. } => CommandKind::GetStorageStats,
            Command::ListTemplates { .. } => CommandKind::ListTemplates,
            Command::ListVolumes { .. } => CommandKind::ListVolumes,
            Command::ComputeChecksum { .. } => CommandKind::ComputeChecksum,
            Command::UploadStatus { .. } => CommandKind::UploadStatus,
            Command::CreateUploadEntity { .. } => CommandKind::CreateUploadEntity,
            Command::CreateEntityDownloadUrl { .. } => CommandKind::CreateEntityDownloadUrl,
            Command::DeleteEntityDownloadUrl { .. } => CommandKind::DeleteEntityDownloadUrl,
        }
    }
}

/// Result payloads carried by a successful [`Answer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerPayload {
    Object {
        object: DataObject,
    },
    Installed {
        install_path: String,
        physical_size: u64,
        virtual_size: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checksum: Option<String>,
    },
    Stats {
        total_bytes: u64,
        used_bytes: u64,
    },
    Listing {
        entries: BTreeMap<String, CatalogEntry>,
    },
    Checksum {
        algorithm: String,
        digest: String,
    },
    Upload {
        status: UploadStatusReport,
    },
    UploadEntity {
        upload_id: String,
        url: String,
    },
    DownloadUrl {
        url: String,
    },
}

/// Answer returned for every command. Failures never cross the command
/// boundary as anything but `success: false` plus a detail string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub success: bool,
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AnswerPayload>,
}

impl Answer {
    pub fn ok(payload: AnswerPayload) -> Self {
        Answer {
            success: true,
            details: String::new(),
            result: Some(payload),
        }
    }

    pub fn ok_empty(details: impl Into<String>) -> Self {
        Answer {
            success: true,
            details: details.into(),
            result: None,
        }
    }

    pub fn failed(details: impl Into<String>) -> Self {
        Answer {
            success: false,
            details: details.into(),
            result: None,
        }
    }
}
