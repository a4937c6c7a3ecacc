use std::path::Path;

use secstore_core::models::ImageFormat;

use super::file_len;
use crate::error::FormatResult;
use crate::traits::{FormatProcessor, ImageSizes};

/// Fallback for any file no other processor claims. Raw images carry no
/// header, so virtual size equals the byte length.
pub struct RawProcessor;

impl FormatProcessor for RawProcessor {
    fn format(&self) -> ImageFormat {
        ImageFormat::Raw
    }

    fn recognizes(&self, path: &Path) -> FormatResult<bool> {
        Ok(path.is_file())
    }

    fn measure(&self, path: &Path) -> FormatResult<ImageSizes> {
        let len = file_len(path)?;
        Ok(ImageSizes {
            virtual_size: len,
            physical_size: len,
        })
    }
}
