use std::path::Path;

use secstore_core::models::ImageFormat;

use super::{file_len, is_ustar};
use crate::error::FormatResult;
use crate::traits::{FormatProcessor, ImageSizes};

/// Plain tar archives (container templates). Stored as-is; sizes are the
/// archive's own.
pub struct TarProcessor;

impl FormatProcessor for TarProcessor {
    fn format(&self) -> ImageFormat {
        ImageFormat::Tar
    }

    fn recognizes(&self, path: &Path) -> FormatResult<bool> {
        Ok(is_ustar(path)?)
    }

    fn measure(&self, path: &Path) -> FormatResult<ImageSizes> {
        let len = file_len(path)?;
        Ok(ImageSizes {
            virtual_size: len,
            physical_size: len,
        })
    }
}
