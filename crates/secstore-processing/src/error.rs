use secstore_core::AppError;

/// Errors raised while probing or unpacking disk images
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid {format} header: {reason}")]
    InvalidHeader { format: &'static str, reason: String },

    #[error("format mismatch: declared {declared}, detected {detected}")]
    Mismatch { declared: String, detected: String },

    #[error("Archive error: {0}")]
    Archive(String),
}

pub type FormatResult<T> = Result<T, FormatError>;

impl From<FormatError> for AppError {
    fn from(err: FormatError) -> Self {
        match err {
            FormatError::Mismatch { declared, detected } => {
                AppError::FormatMismatch { declared, detected }
            }
            FormatError::InvalidHeader { .. } => AppError::InvalidInput(err.to_string()),
            FormatError::Io(e) => AppError::Internal(format!("IO error: {}", e)),
            FormatError::Archive(msg) => AppError::Internal(format!("Archive error: {}", msg)),
        }
    }
}
