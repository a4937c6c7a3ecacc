//! Resumable signed upload pipeline
//!
//! A POST claims its upload id, is validated (headers, signature, expiry,
//! size, account quota), streamed into the install directory, format-checked
//! and finally installed. Any failure puts the entity in `Error`; a dropped
//! request does the same through [`UploadGuard`].

use crate::upload::quota::{QuotaLedger, QuotaReservation};
use crate::upload::registry::{UploadGuard, UploadRegistry};
use crate::upload::signature::{check_not_expired, signed_url, UploadSigner};
use axum::extract::Multipart;
use axum::http::HeaderMap;
use chrono::Utc;
use secstore_core::constants::{GIB, UPLOAD_FILE_FIELD};
use secstore_core::models::UploadParams;
use secstore_core::{AppError, EncryptionService};
use secstore_infra::MountManager;
use secstore_processing::unpack::is_gzip;
use secstore_processing::ProcessorSet;
use secstore_services::handoff::{handoff, HandoffWorker};
use secstore_services::install::{
    discard_install, install_image, InstallRequest, InstalledImage, Placement,
};
use secstore_services::layout::{object_dir, resolve_within};
use secstore_services::ProcessTimeouts;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const METADATA_HEADER: &str = "x-metadata";
pub const EXPIRES_HEADER: &str = "x-expires";
pub const FORWARDED_HOST_HEADER: &str = "x-forwarded-host";

/// Required request headers of an upload.
#[derive(Debug, Clone)]
pub struct UploadHeaders {
    pub signature: String,
    pub metadata: String,
    pub expires: String,
    pub forwarded_host: String,
    pub content_length: u64,
}

impl UploadHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let required = |name: &str| -> Result<String, AppError> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| AppError::InvalidInput(format!("missing required header {}", name)))
        };

        let signature = required(SIGNATURE_HEADER)?;
        let metadata = required(METADATA_HEADER)?;
        let expires = required(EXPIRES_HEADER)?;
        let forwarded_host = required(FORWARDED_HOST_HEADER)?;
        let content_length = required(axum::http::header::CONTENT_LENGTH.as_str())?
            .parse::<u64>()
            .map_err(|_| AppError::InvalidInput("content-length is not a number".to_string()))?;
        if content_length == 0 {
            return Err(AppError::InvalidInput(
                "content-length must be greater than 0".to_string(),
            ));
        }

        Ok(UploadHeaders {
            signature,
            metadata,
            expires,
            forwarded_host,
            content_length,
        })
    }
}

/// An upload that passed every pre-transfer check.
pub struct AuthorizedUpload {
    pub params: UploadParams,
    pub store_root: PathBuf,
    pub install_dir: PathBuf,
    pub content_length: u64,
    pub max_bytes: u64,
    _reservation: Option<QuotaReservation>,
}

pub struct UploadPipeline {
    registry: Arc<UploadRegistry>,
    quota: Arc<QuotaLedger>,
    signer: UploadSigner,
    metadata: EncryptionService,
    mounts: Arc<MountManager>,
    processors: Arc<ProcessorSet>,
    timeouts: ProcessTimeouts,
    max_upload_size_gb: u64,
}

impl UploadPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<UploadRegistry>,
        quota: Arc<QuotaLedger>,
        signer: UploadSigner,
        metadata: EncryptionService,
        mounts: Arc<MountManager>,
        processors: Arc<ProcessorSet>,
        timeouts: ProcessTimeouts,
        max_upload_size_gb: u64,
    ) -> Self {
        UploadPipeline {
            registry,
            quota,
            signer,
            metadata,
            mounts,
            processors,
            timeouts,
            max_upload_size_gb,
        }
    }

    pub fn registry(&self) -> &Arc<UploadRegistry> {
        &self.registry
    }

    /// Run one upload request to a terminal state.
    pub async fn handle(
        &self,
        upload_id: &str,
        headers: &HeaderMap,
        path_and_query: &str,
        multipart: Option<Multipart>,
    ) -> Result<InstalledImage, AppError> {
        self.registry.begin(upload_id)?;
        let _guard = UploadGuard::new(self.registry.clone(), upload_id);
        let start = std::time::Instant::now();

        let result = async {
            let upload = self.authorize(headers, path_and_query).await?;
            self.registry.update(upload_id, |entity| {
                entity.resource_type = Some(upload.params.resource_type);
                entity.format = Some(upload.params.format);
                entity.content_length = upload.content_length;
                entity.checksum = upload.params.checksum.clone();
                entity.max_size_gb = upload.max_bytes / GIB;
                entity.account_id = Some(upload.params.account_id);
                entity.install_dir = Some(upload.install_dir.clone());
            });
            let multipart = multipart.ok_or(AppError::NoFilePart)?;
            self.receive(upload_id, multipart, upload).await
        }
        .await;

        match &result {
            Ok(installed) => {
                self.registry.complete(
                    upload_id,
                    installed.install_path.clone(),
                    installed.physical_size,
                    installed.virtual_size,
                );
                tracing::info!(
                    upload_id = %upload_id,
                    install_path = %installed.install_path,
                    size_bytes = installed.physical_size,
                    virtual_size = installed.virtual_size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Upload completed"
                );
            }
            Err(e) => {
                self.registry.fail(upload_id, e.to_string());
                tracing::warn!(upload_id = %upload_id, error = %e, "Upload failed");
            }
        }
        result
    }

    /// Header, signature, expiry, size and quota checks, in that order.
    pub async fn authorize(
        &self,
        headers: &HeaderMap,
        path_and_query: &str,
    ) -> Result<AuthorizedUpload, AppError> {
        let request = UploadHeaders::from_headers(headers)?;

        let url = signed_url(&request.forwarded_host, path_and_query);
        self.signer
            .verify(&request.signature, &request.metadata, &url, &request.expires)?;
        check_not_expired(&request.expires, Utc::now())?;

        let params: UploadParams = self.metadata.decrypt_json(&request.metadata)?;
        let max_gb = params.max_upload_size_gb.min(self.max_upload_size_gb);
        let max_bytes = max_gb.saturating_mul(GIB);
        if request.content_length > max_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "declared {} bytes exceeds the {} GiB limit",
                request.content_length, max_gb
            )));
        }

        if !params.store.is_filesystem() {
            return Err(AppError::InvalidInput(format!(
                "uploads need a filesystem store, got {}",
                params.store.kind()
            )));
        }
        let store_root = self.mounts.resolve(&params.store).await?;
        let install_dir = match params.install_path_prefix.as_deref() {
            Some(prefix) => resolve_within(&store_root, prefix)?,
            None => store_root.join(object_dir(
                params.resource_type,
                params.account_id,
                params.id,
                None,
            )),
        };

        let reservation = match params.account_quota_gb {
            Some(quota_gb) => Some(
                self.quota
                    .reserve(
                        &store_root,
                        params.account_id,
                        request.content_length,
                        quota_gb.saturating_mul(GIB),
                    )
                    .await?,
            ),
            None => None,
        };

        Ok(AuthorizedUpload {
            params,
            store_root,
            install_dir,
            content_length: request.content_length,
            max_bytes,
            _reservation: reservation,
        })
    }

    /// Stream the file part into the install directory, then finalize.
    async fn receive(
        &self,
        upload_id: &str,
        multipart: Multipart,
        upload: AuthorizedUpload,
    ) -> Result<InstalledImage, AppError> {
        tokio::fs::create_dir_all(&upload.install_dir).await?;
        let staged = upload.install_dir.join(format!(".{}.part", upload_id));

        let result = async {
            let written = stream_file_part(multipart, &staged, upload.max_bytes).await?;
            tracing::debug!(upload_id = %upload_id, size_bytes = written, "Upload body received");

            let processors = self.processors.clone();
            let staged = staged.clone();
            let params = upload.params.clone();
            let store_root = upload.store_root.clone();
            let max_bytes = upload.max_bytes;
            // Dropping `waiter` (timeout or closed request) reverts the install.
            let (waiter, worker) = handoff();
            let task = tokio::task::spawn_blocking(move || {
                finalize_upload(&store_root, &staged, &params, max_bytes, &processors, &worker)
            });
            let timeout = self.timeouts.for_size(written);
            let installed = match tokio::time::timeout(timeout, task).await {
                Ok(joined) => joined
                    .map_err(|e| AppError::Internal(format!("finalize task failed: {}", e)))??,
                Err(_) => {
                    return Err(AppError::Timeout(format!(
                        "finalize did not finish within {}s",
                        timeout.as_secs()
                    )))
                }
            };
            waiter.accept();
            Ok(installed)
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&staged).await;
            // Only succeeds when nothing else lives there.
            let _ = tokio::fs::remove_dir(&upload.install_dir).await;
        }
        result
    }
}

/// Write the single file part to `staged`, returning its length.
async fn stream_file_part(
    mut multipart: Multipart,
    staged: &Path,
    max_bytes: u64,
) -> Result<u64, AppError> {
    let mut written: Option<u64> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(format!("malformed multipart body: {}", e)))?
    {
        if field.file_name().is_none() && field.name() != Some(UPLOAD_FILE_FIELD) {
            continue;
        }
        if written.is_some() {
            return Err(AppError::InvalidInput(
                "exactly one file part is accepted".to_string(),
            ));
        }

        let mut file = tokio::fs::File::create(staged).await?;
        let mut total = 0u64;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|_| AppError::ConnectionClosed)?
        {
            total += chunk.len() as u64;
            if total > max_bytes {
                return Err(AppError::PayloadTooLarge(format!(
                    "upload exceeds the {} byte limit",
                    max_bytes
                )));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        written = Some(total);
    }

    written.ok_or(AppError::NoFilePart)
}

/// Blocking: re-measure, verify the declared format and install.
fn finalize_upload(
    store_root: &Path,
    staged: &Path,
    params: &UploadParams,
    max_bytes: u64,
    processors: &ProcessorSet,
    worker: &HandoffWorker,
) -> Result<InstalledImage, AppError> {
    let physical = std::fs::metadata(staged)?.len();
    if physical > max_bytes {
        return Err(AppError::PayloadTooLarge(format!(
            "received {} bytes, limit is {} bytes",
            physical, max_bytes
        )));
    }

    // Compressed uploads are checked once unpacked.
    let compressed = is_gzip(staged)?;
    if !compressed {
        processors.verify(staged, params.format)?;
    }

    let request = InstallRequest {
        kind: params.resource_type,
        id: params.id,
        account_id: params.account_id,
        volume_id: None,
        name: &params.name,
        description: params.description.as_deref(),
        declared_format: params.format,
        checksum: params.checksum.as_deref(),
        install_dir: params.install_path_prefix.as_deref(),
        placement: Placement::Move,
    };
    if let Err(e) = worker.ensure_wanted() {
        let _ = std::fs::remove_file(staged);
        return Err(e);
    }
    let installed = install_image(store_root, staged, &request, processors)?;

    if compressed && installed.format != params.format {
        discard_install(store_root, &installed.install_path, params.resource_type);
        return Err(AppError::FormatMismatch {
            declared: params.format.to_string(),
            detected: installed.format.to_string(),
        });
    }

    let root = store_root.to_path_buf();
    let install_path = installed.install_path.clone();
    let kind = params.resource_type;
    worker.finish(move || discard_install(&root, &install_path, kind))?;
    Ok(installed)
}
