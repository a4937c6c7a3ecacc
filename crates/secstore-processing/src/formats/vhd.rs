use std::path::Path;

use secstore_core::models::ImageFormat;

use super::{file_len, read_at};
use crate::error::{FormatError, FormatResult};
use crate::traits::{FormatProcessor, ImageSizes};

const COOKIE: &[u8; 8] = b"conectix";
const FOOTER_LEN: u64 = 512;
const CURRENT_SIZE_OFFSET: usize = 48;

/// VHD images. Fixed disks carry only the trailing footer; dynamic and
/// differencing disks also keep a copy at offset 0.
pub struct VhdProcessor;

impl VhdProcessor {
    fn footer(path: &Path) -> FormatResult<Option<[u8; 512]>> {
        let len = file_len(path)?;
        if len < FOOTER_LEN {
            return Ok(None);
        }
        let mut footer = [0u8; 512];
        if read_at(path, len - FOOTER_LEN, &mut footer)? && &footer[..8] == COOKIE {
            return Ok(Some(footer));
        }
        // Older tools wrote a 511-byte footer.
        if len > FOOTER_LEN && read_at(path, len - 511, &mut footer[..511])? && &footer[..8] == COOKIE
        {
            return Ok(Some(footer));
        }
        if read_at(path, 0, &mut footer)? && &footer[..8] == COOKIE {
            return Ok(Some(footer));
        }
        Ok(None)
    }
}

impl FormatProcessor for VhdProcessor {
    fn format(&self) -> ImageFormat {
        ImageFormat::Vhd
    }

    fn recognizes(&self, path: &Path) -> FormatResult<bool> {
        Ok(Self::footer(path)?.is_some())
    }

    fn measure(&self, path: &Path) -> FormatResult<ImageSizes> {
        let footer = Self::footer(path)?.ok_or_else(|| FormatError::InvalidHeader {
            format: "vhd",
            reason: "missing footer".to_string(),
        })?;
        let mut size = [0u8; 8];
        size.copy_from_slice(&footer[CURRENT_SIZE_OFFSET..CURRENT_SIZE_OFFSET + 8]);
        Ok(ImageSizes {
            virtual_size: u64::from_be_bytes(size),
            physical_size: file_len(path)?,
        })
    }
}
