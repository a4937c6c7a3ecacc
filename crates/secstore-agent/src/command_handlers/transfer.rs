//! Download, Copy and Delete

use super::{unexpected, CommandServices, HandlerResult};
use secstore_core::models::{Answer, AnswerPayload, Command, CommandKind, DownloadSource};
use secstore_core::AppError;
use secstore_services::Deleted;
use std::sync::Arc;

pub async fn download(services: Arc<CommandServices>, command: Command) -> HandlerResult {
    let Command::Download {
        store,
        object,
        source,
    } = command
    else {
        return Err(unexpected(CommandKind::Download));
    };

    match source {
        DownloadSource::Url { url, checksum } => {
            if !store.is_filesystem() {
                return Err(AppError::InvalidInput(format!(
                    "URL downloads land on filesystem stores, not {}",
                    store.kind()
                )));
            }
            let downloaded = services
                .mover
                .download_url(&object, &store, &url, checksum.as_deref())
                .await?;
            Ok(Answer::ok(AnswerPayload::Installed {
                install_path: downloaded.object.path,
                physical_size: downloaded.object.physical_size,
                virtual_size: downloaded.object.virtual_size,
                checksum: Some(downloaded.checksum),
            }))
        }
        DownloadSource::Object {
            object: src,
            store: src_store,
        } => {
            let copied = services
                .mover
                .copy(&src, &src_store, &object, &store, None)
                .await?;
            Ok(Answer::ok(AnswerPayload::Installed {
                install_path: copied.path,
                physical_size: copied.physical_size,
                virtual_size: copied.virtual_size,
                checksum: copied.checksum,
            }))
        }
    }
}

pub async fn copy(services: Arc<CommandServices>, command: Command) -> HandlerResult {
    let Command::Copy {
        src_object,
        src_store,
        dest_object,
        dest_store,
        cache_store,
    } = command
    else {
        return Err(unexpected(CommandKind::Copy));
    };

    let object = services
        .mover
        .copy(
            &src_object,
            &src_store,
            &dest_object,
            &dest_store,
            cache_store.as_ref(),
        )
        .await?;
    Ok(Answer::ok(AnswerPayload::Object { object }))
}

pub async fn delete(services: Arc<CommandServices>, command: Command) -> HandlerResult {
    let Command::Delete { object, store } = command else {
        return Err(unexpected(CommandKind::Delete));
    };

    let details = match services.deletion.delete(&object, &store).await? {
        Deleted::Removed(path) => format!("deleted {}", path),
        Deleted::Objects(count) => format!("deleted {} objects", count),
        Deleted::AlreadyGone => "already deleted".to_string(),
    };
    Ok(Answer::ok_empty(details))
}
