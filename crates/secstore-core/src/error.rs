//! Error types module
//!
//! All agent errors are unified under `AppError`. Backend crates keep their own
//! error enums and convert into this one at the crate boundary.

use std::io;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Expected errors like validation failures
    Debug,
    /// Recoverable issues
    Warn,
    /// Unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented.
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "QUOTA_EXCEEDED")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("signature validation failed")]
    SignatureMismatch,

    #[error("request expired")]
    Expired,

    #[error("upload size exceeded: {0}")]
    PayloadTooLarge(String),

    #[error("quota exceeded for account {account_id}: {used_bytes} bytes used, {requested_bytes} bytes requested, quota is {quota_bytes} bytes")]
    QuotaExceeded {
        account_id: u64,
        used_bytes: u64,
        requested_bytes: u64,
        quota_bytes: u64,
    },

    #[error("format mismatch: declared {declared}, detected {detected}")]
    FormatMismatch { declared: String, detected: String },

    #[error("upload id {0} has already been used")]
    UploadIdInUse(String),

    #[error("payload contains no file part")]
    NoFilePart,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Mount error: {0}")]
    Mount(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("connection closed prematurely")]
    ConnectionClosed,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, sensitive, log_level).
fn app_error_static_metadata(err: &AppError) -> (u16, &'static str, bool, bool, LogLevel) {
    match err {
        AppError::Config(_) => (500, "CONFIG_ERROR", false, true, LogLevel::Error),
        AppError::InvalidInput(_) => (400, "INVALID_INPUT", false, false, LogLevel::Debug),
        AppError::SignatureMismatch => (400, "SIGNATURE_MISMATCH", false, false, LogLevel::Warn),
        AppError::Expired => (400, "REQUEST_EXPIRED", false, false, LogLevel::Debug),
        AppError::PayloadTooLarge(_) => (400, "PAYLOAD_TOO_LARGE", false, false, LogLevel::Debug),
        AppError::QuotaExceeded { .. } => (400, "QUOTA_EXCEEDED", false, false, LogLevel::Debug),
        AppError::FormatMismatch { .. } => (400, "FORMAT_MISMATCH", false, false, LogLevel::Warn),
        AppError::UploadIdInUse(_) => (400, "UPLOAD_ID_IN_USE", false, false, LogLevel::Warn),
        AppError::NoFilePart => (422, "NO_FILE_PART", false, false, LogLevel::Debug),
        AppError::Unauthorized(_) => (401, "UNAUTHORIZED", false, false, LogLevel::Debug),
        AppError::Mount(_) => (500, "MOUNT_ERROR", true, false, LogLevel::Error),
        AppError::Process(_) => (500, "PROCESS_ERROR", true, false, LogLevel::Error),
        AppError::Timeout(_) => (500, "TIMEOUT", true, false, LogLevel::Error),
        AppError::Storage(_) => (500, "STORAGE_ERROR", true, false, LogLevel::Error),
        AppError::NotFound(_) => (404, "NOT_FOUND", false, false, LogLevel::Debug),
        AppError::ConnectionClosed => (500, "CONNECTION_CLOSED", true, false, LogLevel::Warn),
        AppError::Internal(_) => (500, "INTERNAL_ERROR", true, true, LogLevel::Error),
        AppError::InternalWithSource { .. } => (500, "INTERNAL_ERROR", true, true, LogLevel::Error),
    }
}

impl AppError {
    /// Whether this error belongs to the per-request validation class (bad
    /// signature, expiry, size, quota, format mismatch).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::InvalidInput(_)
                | AppError::SignatureMismatch
                | AppError::Expired
                | AppError::PayloadTooLarge(_)
                | AppError::QuotaExceeded { .. }
                | AppError::FormatMismatch { .. }
                | AppError::UploadIdInUse(_)
                | AppError::NoFilePart
        )
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).3
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).4
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Config(_) => "Agent is misconfigured".to_string(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_map_to_400() {
        let errors = [
            AppError::SignatureMismatch,
            AppError::Expired,
            AppError::PayloadTooLarge("10 GiB > 5 GiB".to_string()),
            AppError::QuotaExceeded {
                account_id: 2,
                used_bytes: 10,
                requested_bytes: 20,
                quota_bytes: 15,
            },
            AppError::FormatMismatch {
                declared: "qcow2".to_string(),
                detected: "raw".to_string(),
            },
            AppError::UploadIdInUse("abc".to_string()),
        ];
        for err in errors {
            assert_eq!(err.http_status_code(), 400, "{}", err);
            assert!(err.is_validation());
            assert!(!err.is_sensitive());
        }
    }

    #[test]
    fn test_no_file_part_is_unprocessable() {
        let err = AppError::NoFilePart;
        assert_eq!(err.http_status_code(), 422);
        assert_eq!(err.error_code(), "NO_FILE_PART");
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let err = AppError::Internal("disk exploded at /dev/sda".to_string());
        assert_eq!(err.http_status_code(), 500);
        assert!(err.is_sensitive());
        assert_eq!(err.client_message(), "Internal server error");
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_quota_message_distinguishes_from_signature() {
        let quota = AppError::QuotaExceeded {
            account_id: 7,
            used_bytes: 1,
            requested_bytes: 2,
            quota_bytes: 2,
        };
        assert!(quota.client_message().contains("quota exceeded"));
        assert!(!AppError::SignatureMismatch
            .client_message()
            .contains("quota"));
    }

    #[test]
    fn test_format_mismatch_message_names_both_formats() {
        let err = AppError::FormatMismatch {
            declared: "qcow2".to_string(),
            detected: "raw".to_string(),
        };
        let msg = err.client_message();
        assert!(msg.contains("qcow2"));
        assert!(msg.contains("raw"));
    }

    #[test]
    fn test_detailed_message_includes_source_chain() {
        let err = AppError::from(anyhow::anyhow!("inner").context("outer"));
        assert!(err.detailed_message().contains("inner"));
    }
}
