//! Upload entities keyed by upload id
//!
//! One mutex serializes every access. Terminal entries are reported once and
//! then removed.

use secstore_core::models::{UploadEntity, UploadState, UploadStatusReport};
use secstore_core::AppError;
use secstore_services::layout::dir_size;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const CONNECTION_CLOSED: &str = "connection closed prematurely";

#[derive(Default)]
pub struct UploadRegistry {
    entries: Mutex<HashMap<String, UploadEntity>>,
}

impl UploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, UploadEntity>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pre-register an upload id in `Created` state. A fresh id is generated
    /// when none is given.
    pub fn create(&self, upload_id: Option<String>) -> Result<String, AppError> {
        let upload_id = match upload_id {
            Some(id) => {
                validate_upload_id(&id)?;
                id
            }
            None => Uuid::new_v4().to_string(),
        };

        let mut entries = self.entries();
        if entries.contains_key(&upload_id) {
            return Err(AppError::UploadIdInUse(upload_id));
        }
        entries.insert(upload_id.clone(), UploadEntity::new(upload_id.clone()));
        tracing::info!(upload_id = %upload_id, "Upload entity created");
        Ok(upload_id)
    }

    /// Claim `upload_id` for a transfer. Unknown and `Created` ids move to
    /// `InProgress`; any other state is left untouched and rejected.
    pub fn begin(&self, upload_id: &str) -> Result<(), AppError> {
        validate_upload_id(upload_id)?;
        let mut entries = self.entries();
        let entity = entries
            .entry(upload_id.to_string())
            .or_insert_with(|| UploadEntity::new(upload_id));
        if entity.state != UploadState::Created {
            tracing::warn!(upload_id = %upload_id, state = %entity.state, "Upload id reused");
            return Err(AppError::UploadIdInUse(upload_id.to_string()));
        }
        entity.state = UploadState::InProgress;
        Ok(())
    }

    pub fn update(&self, upload_id: &str, f: impl FnOnce(&mut UploadEntity)) {
        if let Some(entity) = self.entries().get_mut(upload_id) {
            f(entity);
        }
    }

    pub fn complete(
        &self,
        upload_id: &str,
        install_path: String,
        physical_size: u64,
        virtual_size: u64,
    ) {
        self.update(upload_id, |entity| {
            entity.state = UploadState::Completed;
            entity.install_path = Some(install_path);
            entity.physical_size = Some(physical_size);
            entity.virtual_size = Some(virtual_size);
        });
    }

    /// Move a non-terminal entity to `Error`. Returns whether it changed.
    pub fn fail(&self, upload_id: &str, message: impl Into<String>) -> bool {
        let mut entries = self.entries();
        match entries.get_mut(upload_id) {
            Some(entity) if !entity.state.is_terminal() => {
                entity.state = UploadState::Error;
                entity.message = Some(message.into());
                true
            }
            _ => false,
        }
    }

    pub fn state(&self, upload_id: &str) -> Option<UploadState> {
        self.entries().get(upload_id).map(|e| e.state)
    }

    /// Report on `upload_id`. Blocking: in-progress reports measure the
    /// install directory.
    pub fn status(&self, upload_id: &str) -> UploadStatusReport {
        let entity = {
            let mut entries = self.entries();
            match entries.get(upload_id).map(|e| e.state) {
                None => return UploadStatusReport::unknown(upload_id),
                Some(state) if state.is_terminal() => entries.remove(upload_id),
                Some(_) => entries.get(upload_id).cloned(),
            }
        };
        let Some(entity) = entity else {
            return UploadStatusReport::unknown(upload_id);
        };

        let mut report = UploadStatusReport {
            upload_id: entity.upload_id.clone(),
            status: entity.state.to_string(),
            percent: 0,
            install_path: None,
            physical_size: None,
            virtual_size: None,
            message: None,
        };
        match entity.state {
            UploadState::Created => {}
            UploadState::InProgress => {
                report.percent = progress_percent(&entity);
            }
            UploadState::Completed => {
                report.percent = 100;
                report.install_path = entity.install_path;
                report.physical_size = entity.physical_size;
                report.virtual_size = entity.virtual_size;
            }
            UploadState::Error => {
                report.message = entity.message;
            }
        }
        report
    }
}

fn progress_percent(entity: &UploadEntity) -> u8 {
    let Some(dir) = &entity.install_dir else {
        return 0;
    };
    if entity.content_length == 0 {
        return 0;
    }
    let written = dir_size(dir).unwrap_or(0);
    (written.saturating_mul(100) / entity.content_length).min(100) as u8
}

/// Upload ids name staging files, so only a conservative alphabet is accepted.
pub fn validate_upload_id(upload_id: &str) -> Result<(), AppError> {
    let valid = !upload_id.is_empty()
        && upload_id.len() <= 128
        && upload_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!(
            "invalid upload id {:?}",
            upload_id
        )))
    }
}

/// Marks the entity `Error` if the owning request ends before reaching a
/// terminal state, including when its future is dropped mid-transfer.
pub struct UploadGuard {
    registry: Arc<UploadRegistry>,
    upload_id: String,
}

impl UploadGuard {
    pub fn new(registry: Arc<UploadRegistry>, upload_id: impl Into<String>) -> Self {
        UploadGuard {
            registry,
            upload_id: upload_id.into(),
        }
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        if self.registry.fail(&self.upload_id, CONNECTION_CLOSED) {
            tracing::warn!(upload_id = %self.upload_id, "Upload connection closed prematurely");
        }
    }
}
