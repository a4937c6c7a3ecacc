//! Read-only store queries: stats, listings, checksums

use super::{unexpected, CommandServices, HandlerResult};
use secstore_core::models::{Answer, AnswerPayload, Command, CommandKind, ObjectKind};
use secstore_core::AppError;
use secstore_services::layout::resolve_within;
use secstore_services::{compute_checksum, list_catalog, storage_stats, ChecksumAlgorithm};
use std::sync::Arc;

async fn blocking<T, F>(work: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::Internal(format!("blocking task failed: {}", e)))?
}

pub async fn storage_stats_of(services: Arc<CommandServices>, command: Command) -> HandlerResult {
    let Command::GetStorageStats { store } = command else {
        return Err(unexpected(CommandKind::GetStorageStats));
    };
    let root = services.filesystem_root(&store).await?;

    let stats = blocking(move || {
        storage_stats(&root).ok_or_else(|| {
            AppError::Storage(format!("no disk found for {}", root.display()))
        })
    })
    .await?;
    Ok(Answer::ok(AnswerPayload::Stats {
        total_bytes: stats.total_bytes,
        used_bytes: stats.used_bytes,
    }))
}

pub async fn list_templates(services: Arc<CommandServices>, command: Command) -> HandlerResult {
    let Command::ListTemplates { store } = command else {
        return Err(unexpected(CommandKind::ListTemplates));
    };
    list(&services, &store, ObjectKind::Template).await
}

pub async fn list_volumes(services: Arc<CommandServices>, command: Command) -> HandlerResult {
    let Command::ListVolumes { store } = command else {
        return Err(unexpected(CommandKind::ListVolumes));
    };
    list(&services, &store, ObjectKind::Volume).await
}

async fn list(
    services: &CommandServices,
    store: &secstore_core::StoreDescriptor,
    kind: ObjectKind,
) -> HandlerResult {
    let root = services.filesystem_root(store).await?;
    let entries = blocking(move || list_catalog(&root, kind)).await?;
    Ok(Answer::ok(AnswerPayload::Listing { entries }))
}

pub async fn checksum(services: Arc<CommandServices>, command: Command) -> HandlerResult {
    let Command::ComputeChecksum {
        store,
        path,
        algorithm,
    } = command
    else {
        return Err(unexpected(CommandKind::ComputeChecksum));
    };

    let algorithm = ChecksumAlgorithm::from_option(algorithm.as_deref())?;
    let root = services.filesystem_root(&store).await?;
    let file = resolve_within(&root, &path)?;

    let digest = blocking(move || {
        if !file.is_file() {
            return Err(AppError::NotFound(format!("{} is not a file", file.display())));
        }
        Ok(compute_checksum(&file, algorithm)?)
    })
    .await?;

    tracing::debug!(path = %path, algorithm = %algorithm, "Checksum computed");
    Ok(Answer::ok(AnswerPayload::Checksum {
        algorithm: algorithm.to_string(),
        digest,
    }))
}
