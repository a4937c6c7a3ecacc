use crate::error::HttpAppError;
use crate::state::AppState;
use crate::upload::signature::secure_compare;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap},
    Json,
};
use secstore_core::models::{Answer, Command};
use secstore_core::AppError;
use std::sync::Arc;

/// `POST /commands`
///
/// Runs one command and returns its answer. Command failures are answers
/// with `success: false`, not HTTP errors.
pub async fn run_command(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<Command>, JsonRejection>,
) -> Result<Json<Answer>, HttpAppError> {
    if let Some(expected) = state.service_api_key.as_deref() {
        authorize(&headers, expected)?;
    }

    let Json(command) = body?;
    let kind = command.kind();
    let answer = state.dispatcher.dispatch(command).await;
    tracing::info!(command = ?kind, success = answer.success, "Command handled");
    Ok(Json(answer))
}

fn authorize(headers: &HeaderMap, expected: &str) -> Result<(), AppError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;

    if !secure_compare(token.trim(), expected) {
        return Err(AppError::Unauthorized("invalid bearer token".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_checked() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            authorize(&headers, "k3y"),
            Err(AppError::Unauthorized(_))
        ));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        assert!(authorize(&headers, "k3y").is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer k3y"));
        assert!(authorize(&headers, "k3y").is_ok());
    }
}
