//! Command dispatcher
//!
//! A table maps each [`CommandKind`] to its handler. Download and Copy go
//! through the worker pool; everything else runs on the caller's task.

use crate::command_handlers::{entities, store, transfer, CommandServices, HandlerResult};
use async_trait::async_trait;
use secstore_core::models::{Answer, Command, CommandKind};
use secstore_core::ErrorMetadata;
use secstore_worker::{CommandHandlerContext, WorkerPool, WorkerPoolConfig};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Instant;

pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;
pub type CommandHandler = fn(Arc<CommandServices>, Command) -> HandlerFuture;

pub struct Dispatcher {
    services: Arc<CommandServices>,
    handlers: HashMap<CommandKind, CommandHandler>,
    pool: WorkerPool,
}

impl Dispatcher {
    /// Build the dispatcher and its worker pool. The pool holds the
    /// dispatcher weakly.
    pub fn start(services: CommandServices, pool_config: WorkerPoolConfig) -> Arc<Self> {
        let services = Arc::new(services);
        Arc::new_cyclic(|weak: &Weak<Dispatcher>| {
            let context: Weak<dyn CommandHandlerContext> = weak.clone();
            Dispatcher {
                services,
                handlers: handler_table(),
                pool: WorkerPool::new(pool_config, context),
            }
        })
    }

    pub fn services(&self) -> &Arc<CommandServices> {
        &self.services
    }

    pub fn is_long_running(kind: CommandKind) -> bool {
        matches!(kind, CommandKind::Download | CommandKind::Copy)
    }

    /// Execute `command` and answer it. Never fails across this boundary.
    pub async fn dispatch(&self, command: Command) -> Answer {
        if Self::is_long_running(command.kind()) {
            return match self.pool.submit(command).await {
                Ok(answer) => answer,
                Err(e) => {
                    tracing::error!(error = %e, "Worker pool rejected command");
                    Answer::failed(e.to_string())
                }
            };
        }
        self.run(command).await
    }

    async fn run(&self, command: Command) -> Answer {
        let kind = command.kind();
        let Some(handler) = self.handlers.get(&kind) else {
            return Answer::failed(format!("no handler registered for {:?}", kind));
        };

        let start = Instant::now();
        match handler(self.services.clone(), command).await {
            Ok(answer) => {
                tracing::debug!(
                    command = ?kind,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Command answered"
                );
                answer
            }
            Err(e) => {
                if e.is_recoverable() {
                    tracing::error!(command = ?kind, error = %e, "Command failed");
                } else {
                    tracing::warn!(command = ?kind, error = %e, "Command rejected");
                }
                Answer::failed(e.to_string())
            }
        }
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

#[async_trait]
impl CommandHandlerContext for Dispatcher {
    async fn execute(self: Arc<Self>, command: Command) -> Answer {
        self.run(command).await
    }
}

fn handler_table() -> HashMap<CommandKind, CommandHandler> {
    let mut table: HashMap<CommandKind, CommandHandler> = HashMap::new();
    table.insert(CommandKind::Download, |s, c| Box::pin(transfer::download(s, c)));
    table.insert(CommandKind::Copy, |s, c| Box::pin(transfer::copy(s, c)));
    table.insert(CommandKind::Delete, |s, c| Box::pin(transfer::delete(s, c)));
    table.insert(CommandKind::GetStorageStats, |s, c| {
        Box::pin(store::storage_stats_of(s, c))
    });
    table.insert(CommandKind::ListTemplates, |s, c| {
        Box::pin(store::list_templates(s, c))
    });
    table.insert(CommandKind::ListVolumes, |s, c| Box::pin(store::list_volumes(s, c)));
    table.insert(CommandKind::ComputeChecksum, |s, c| Box::pin(store::checksum(s, c)));
    table.insert(CommandKind::UploadStatus, |s, c| {
        Box::pin(entities::upload_status(s, c))
    });
    table.insert(CommandKind::CreateUploadEntity, |s, c| {
        Box::pin(entities::create_upload_entity(s, c))
    });
    table.insert(CommandKind::CreateEntityDownloadUrl, |s, c| {
        Box::pin(entities::create_download_url(s, c))
    });
    table.insert(CommandKind::DeleteEntityDownloadUrl, |s, c| {
        Box::pin(entities::delete_download_url(s, c))
    });
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_handler() {
        let table = handler_table();
        for kind in CommandKind::ALL {
            assert!(table.contains_key(&kind), "{:?}", kind);
        }
    }

    #[test]
    fn test_only_transfers_are_pooled() {
        let pooled: Vec<_> = CommandKind::ALL
            .into_iter()
            .filter(|k| Dispatcher::is_long_running(*k))
            .collect();
        assert_eq!(pooled, vec![CommandKind::Download, CommandKind::Copy]);
    }
}
