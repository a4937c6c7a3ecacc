//! Service initialization and application state setup

use crate::command_handlers::CommandServices;
use crate::dispatcher::Dispatcher;
use crate::state::AppState;
use crate::upload::{QuotaLedger, UploadPipeline, UploadRegistry, UploadSigner};
use anyhow::{Context, Result};
use secstore_core::{Config, EncryptionService};
use secstore_infra::{CommandRunner, MountManager};
use secstore_processing::ProcessorSet;
use secstore_services::{
    DataMover, DeletionService, DownloadLinks, ProcessTimeouts, UrlDownloader,
};
use secstore_storage::StorageProvider;
use secstore_worker::WorkerPoolConfig;
use std::sync::Arc;

/// Wire every service the agent needs and return the shared state.
///
/// External processes go through `runner` and object stores are opened via
/// `storage`, so tests can substitute both.
pub fn build_state(
    config: &Config,
    runner: Arc<dyn CommandRunner>,
    storage: Arc<dyn StorageProvider>,
    upload_key: &[u8],
) -> Result<Arc<AppState>> {
    let mounts = Arc::new(MountManager::from_config(config, runner.clone()));
    let processors = Arc::new(ProcessorSet::default());
    let timeouts = ProcessTimeouts {
        floor_secs: config.process_timeout_floor_secs(),
        per_gb_secs: config.process_timeout_per_gb_secs(),
    };

    let downloader = UrlDownloader::new(config.max_download_size_gb())
        .context("Failed to build the URL downloader")?;
    let mover = DataMover::new(
        mounts.clone(),
        storage.clone(),
        processors.clone(),
        runner,
        downloader,
        config.snapshot_template_helper().map(|p| p.to_path_buf()),
        timeouts,
    );

    let registry = Arc::new(UploadRegistry::new());
    let metadata = EncryptionService::from_shared_key(upload_key)
        .context("Failed to derive the metadata key")?;
    let pipeline = UploadPipeline::new(
        registry.clone(),
        Arc::new(QuotaLedger::new()),
        UploadSigner::new(upload_key),
        metadata,
        mounts.clone(),
        processors,
        timeouts,
        config.max_upload_size_gb(),
    );

    let services = CommandServices {
        mounts: mounts.clone(),
        mover,
        deletion: DeletionService::new(mounts, storage),
        uploads: registry,
        links: DownloadLinks::new(
            config.public_download_dir().to_path_buf(),
            config.public_download_base_url(),
        ),
        upload_base_url: config.upload_public_base_url().to_string(),
    };

    let dispatcher = Dispatcher::start(
        services,
        WorkerPoolConfig {
            max_workers: config.worker_pool_size(),
            ..WorkerPoolConfig::default()
        },
    );
    tracing::info!(
        workers = config.worker_pool_size(),
        max_upload_size_gb = config.max_upload_size_gb(),
        "Command dispatcher started"
    );

    Ok(Arc::new(AppState {
        config: config.clone(),
        dispatcher,
        uploads: Arc::new(pipeline),
        service_api_key: config.service_api_key().map(String::from),
    }))
}
