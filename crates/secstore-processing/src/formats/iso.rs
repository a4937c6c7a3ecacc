use std::path::Path;

use secstore_core::models::ImageFormat;

use super::{file_len, read_at};
use crate::error::FormatResult;
use crate::traits::{FormatProcessor, ImageSizes};

/// ISO 9660: `CD001` in the first volume descriptor at sector 16.
pub struct IsoProcessor;

const DESCRIPTOR_ID_OFFSET: u64 = 0x8001;

impl FormatProcessor for IsoProcessor {
    fn format(&self) -> ImageFormat {
        ImageFormat::Iso
    }

    fn recognizes(&self, path: &Path) -> FormatResult<bool> {
        let mut id = [0u8; 5];
        Ok(read_at(path, DESCRIPTOR_ID_OFFSET, &mut id)? && &id == b"CD001")
    }

    fn measure(&self, path: &Path) -> FormatResult<ImageSizes> {
        let len = file_len(path)?;
        Ok(ImageSizes {
            virtual_size: len,
            physical_size: len,
        })
    }
}
