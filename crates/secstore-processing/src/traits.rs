use std::path::Path;

use secstore_core::models::ImageFormat;

use crate::error::FormatResult;

/// Sizes reported for an image file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSizes {
    pub virtual_size: u64,
    pub physical_size: u64,
}

/// A recognized image and its measured sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatMatch {
    pub format: ImageFormat,
    pub virtual_size: u64,
    pub physical_size: u64,
}

/// One analyzer per disk-image format.
///
/// Implementations do blocking file IO; async callers run them under
/// `spawn_blocking`.
pub trait FormatProcessor: Send + Sync {
    fn format(&self) -> ImageFormat;

    /// Signature check only.
    fn recognizes(&self, path: &Path) -> FormatResult<bool>;

    /// Parse header metadata into sizes.
    fn measure(&self, path: &Path) -> FormatResult<ImageSizes>;

    /// Signature check followed by a header parse.
    fn detect(&self, path: &Path) -> FormatResult<Option<FormatMatch>> {
        if !self.recognizes(path)? {
            return Ok(None);
        }
        let sizes = self.measure(path)?;
        Ok(Some(FormatMatch {
            format: self.format(),
            virtual_size: sizes.virtual_size.max(sizes.physical_size),
            physical_size: sizes.physical_size,
        }))
    }
}
