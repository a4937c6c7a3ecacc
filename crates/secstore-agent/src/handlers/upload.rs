use crate::error::HttpAppError;
use crate::state::AppState;
use axum::{
    extract::{multipart::MultipartRejection, Multipart, OriginalUri, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use secstore_core::AppError;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub uuid: Option<String>,
}

/// `POST /upload?uuid=<id>`
///
/// The body must be `multipart/form-data` with exactly one file part. The
/// signature covers the full request URL as seen through `x-forwarded-host`.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadQuery>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, HttpAppError> {
    let upload_id = query
        .uuid
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::InvalidInput("uuid query parameter is required".to_string()))?;

    tracing::debug!(upload_id = %upload_id, "Upload request received");

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/upload");

    let multipart = match multipart {
        Ok(multipart) => Some(multipart),
        Err(rejection) => {
            tracing::debug!(rejection = %rejection.body_text(), "Request body is not multipart");
            None
        }
    };

    state
        .uploads
        .handle(&upload_id, &headers, path_and_query, multipart)
        .await?;

    Ok((StatusCode::OK, "upload successful."))
}
