use crate::error::HttpAppError;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use secstore_core::models::UploadStatusReport;
use secstore_core::AppError;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub uuid: String,
}

/// `GET /upload/status?uuid=<id>`
///
/// Reporting a terminal status removes the entity.
pub async fn upload_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<UploadStatusReport>, HttpAppError> {
    let registry = state.uploads.registry().clone();
    let report = tokio::task::spawn_blocking(move || registry.status(&query.uuid))
        .await
        .map_err(|e| AppError::Internal(format!("status task failed: {}", e)))?;
    Ok(Json(report))
}
