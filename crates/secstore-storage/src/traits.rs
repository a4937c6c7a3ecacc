//! Object-store abstraction
//!
//! Filesystem-backed stores are reached through mount paths; this trait
//! covers the remote backends only.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use secstore_core::{AppError, StoreDescriptor, StoreKind};
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => AppError::NotFound(key),
            StorageError::InvalidKey(msg) => AppError::InvalidInput(msg),
            other => AppError::Storage(other.to_string()),
        }
    }
}

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

/// Remote object backend (S3-compatible or Swift).
///
/// Keys are relative to the store's root (bucket prefix or container) and
/// never start with `/` or contain `..`.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    fn kind(&self) -> StoreKind;

    /// Stream a local file to `key` in chunks. Returns bytes written.
    async fn put_file(&self, key: &str, file: &Path) -> StorageResult<u64>;

    /// Stream `key` into a local file, creating or truncating it.
    async fn get_to_file(&self, key: &str, dest: &Path) -> StorageResult<u64>;

    /// All objects under `prefix`.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectEntry>>;

    /// Recursively delete everything under `prefix`. Returns how many objects
    /// were removed; zero is not an error.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize>;

    /// Delete exactly `key`. Returns false when it did not exist.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;
}

/// Opens object storage for a store descriptor. The default provider builds
/// real backends; tests substitute in-memory ones.
pub trait StorageProvider: Send + Sync {
    fn open(&self, store: &StoreDescriptor) -> StorageResult<Arc<dyn ObjectStorage>>;
}
