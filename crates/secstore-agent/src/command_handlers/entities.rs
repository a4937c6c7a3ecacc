//! Upload entities and public download links

use super::{unexpected, CommandServices, HandlerResult};
use secstore_core::models::{Answer, AnswerPayload, Command, CommandKind};
use secstore_core::AppError;
use secstore_services::layout::resolve_within;
use std::sync::Arc;
use uuid::Uuid;

pub async fn upload_status(services: Arc<CommandServices>, command: Command) -> HandlerResult {
    let Command::UploadStatus { upload_id } = command else {
        return Err(unexpected(CommandKind::UploadStatus));
    };

    let registry = services.uploads.clone();
    let status = tokio::task::spawn_blocking(move || registry.status(&upload_id))
        .await
        .map_err(|e| AppError::Internal(format!("status task failed: {}", e)))?;
    Ok(Answer::ok(AnswerPayload::Upload { status }))
}

pub async fn create_upload_entity(
    services: Arc<CommandServices>,
    command: Command,
) -> HandlerResult {
    let Command::CreateUploadEntity { upload_id } = command else {
        return Err(unexpected(CommandKind::CreateUploadEntity));
    };

    let upload_id = services.uploads.create(upload_id)?;
    let url = format!(
        "{}/upload?uuid={}",
        services.upload_base_url.trim_end_matches('/'),
        upload_id
    );
    Ok(Answer::ok(AnswerPayload::UploadEntity { upload_id, url }))
}

pub async fn create_download_url(
    services: Arc<CommandServices>,
    command: Command,
) -> HandlerResult {
    let Command::CreateEntityDownloadUrl {
        store,
        path,
        link_name,
    } = command
    else {
        return Err(unexpected(CommandKind::CreateEntityDownloadUrl));
    };

    let root = services.filesystem_root(&store).await?;
    let target = resolve_within(&root, &path)?;
    let link_name = match link_name {
        Some(name) => name,
        None => default_link_name(&path),
    };

    let url = services.links.create(&target, &link_name).await?;
    Ok(Answer::ok(AnswerPayload::DownloadUrl { url }))
}

pub async fn delete_download_url(
    services: Arc<CommandServices>,
    command: Command,
) -> HandlerResult {
    let Command::DeleteEntityDownloadUrl { link_name } = command else {
        return Err(unexpected(CommandKind::DeleteEntityDownloadUrl));
    };

    let details = if services.links.delete(&link_name).await? {
        format!("removed {}", link_name)
    } else {
        format!("{} was already removed", link_name)
    };
    Ok(Answer::ok_empty(details))
}

/// A fresh, unguessable link name keeping the target's extension.
fn default_link_name(path: &str) -> String {
    let ext = std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()));
    match ext {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
        None => Uuid::new_v4().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_link_name_keeps_extension() {
        assert!(default_link_name("template/tmpl/2/201/a.qcow2").ends_with(".qcow2"));
        assert!(!default_link_name("volumes/2/9/disk").contains('.'));
    }
}
