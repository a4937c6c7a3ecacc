//! One async function per command kind.
//!
//! Handlers receive the command by value and return an [`Answer`] or an
//! [`AppError`]; the dispatcher turns errors into failed answers.

pub mod entities;
pub mod store;
pub mod transfer;

use crate::upload::UploadRegistry;
use secstore_core::models::{Answer, CommandKind};
use secstore_core::{AppError, StoreDescriptor};
use secstore_infra::MountManager;
use secstore_services::{DataMover, DeletionService, DownloadLinks};
use std::path::PathBuf;
use std::sync::Arc;

/// Everything command handlers need.
pub struct CommandServices {
    pub mounts: Arc<MountManager>,
    pub mover: DataMover,
    pub deletion: DeletionService,
    pub uploads: Arc<UploadRegistry>,
    pub links: DownloadLinks,
    /// Prefix of the URLs handed out for uploads.
    pub upload_base_url: String,
}

impl CommandServices {
    /// Local root of a filesystem store, mounting it if needed.
    pub async fn filesystem_root(&self, store: &StoreDescriptor) -> Result<PathBuf, AppError> {
        if !store.is_filesystem() {
            return Err(AppError::InvalidInput(format!(
                "{} stores are not supported by this command",
                store.kind()
            )));
        }
        Ok(self.mounts.resolve(store).await?)
    }
}

pub(crate) fn unexpected(kind: CommandKind) -> AppError {
    AppError::Internal(format!("{:?} handler received another command", kind))
}

pub type HandlerResult = Result<Answer, AppError>;
