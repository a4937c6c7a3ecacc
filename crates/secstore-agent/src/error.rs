//! HTTP error response conversion
//!
//! Handlers return `Result<impl IntoResponse, HttpAppError>`. Errors render as a
//! plain-text body describing the failure; internal faults also close the
//! connection.

use axum::{
    extract::rejection::JsonRejection,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use secstore_core::{AppError, ErrorMetadata, LogLevel};

/// Wrapper so `AppError` (from secstore-core) can implement `IntoResponse`.
#[derive(Debug)]
pub struct HttpAppError(pub AppError);

impl From<AppError> for HttpAppError {
    fn from(err: AppError) -> Self {
        HttpAppError(err)
    }
}

impl From<anyhow::Error> for HttpAppError {
    fn from(err: anyhow::Error) -> Self {
        HttpAppError(AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        })
    }
}

impl From<JsonRejection> for HttpAppError {
    fn from(rejection: JsonRejection) -> Self {
        HttpAppError(AppError::InvalidInput(format!(
            "invalid command body: {}",
            rejection.body_text()
        )))
    }
}

fn log_error(error: &AppError) {
    let code = error.error_code();
    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(error = %error, error_code = code, "Request rejected");
        }
        LogLevel::Warn => {
            tracing::warn!(error = %error, error_code = code, "Request rejected");
        }
        LogLevel::Error => {
            tracing::error!(error = %error.detailed_message(), error_code = code, "Request failed");
        }
    }
}

fn is_production_env() -> bool {
    std::env::var("ENVIRONMENT")
        .map(|env| env.eq_ignore_ascii_case("production") || env.eq_ignore_ascii_case("prod"))
        .unwrap_or(false)
}

/// Body text for `error`: the client message, with the cause chain outside
/// production for non-sensitive errors.
pub fn response_text(error: &AppError, is_production: bool) -> String {
    if is_production || error.is_sensitive() {
        error.client_message()
    } else {
        error.detailed_message()
    }
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let app_error = &self.0;
        let status = StatusCode::from_u16(app_error.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        log_error(app_error);

        let body = response_text(app_error, is_production_env());
        let mut response = (status, body).into_response();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
        }
        response
    }
}
