use std::path::Path;

use secstore_core::models::ImageFormat;

use super::{file_len, read_at};
use crate::error::{FormatError, FormatResult};
use crate::traits::{FormatProcessor, ImageSizes};

const QCOW2_MAGIC: [u8; 4] = [b'Q', b'F', b'I', 0xfb];
const HEADER_LEN: usize = 32;
const VERSION_OFFSET: usize = 4;
const SIZE_OFFSET: usize = 24;

/// QCOW2 images: big-endian header, virtual size at byte 24.
pub struct Qcow2Processor;

impl FormatProcessor for Qcow2Processor {
    fn format(&self) -> ImageFormat {
        ImageFormat::Qcow2
    }

    fn recognizes(&self, path: &Path) -> FormatResult<bool> {
        let mut magic = [0u8; 4];
        Ok(read_at(path, 0, &mut magic)? && magic == QCOW2_MAGIC)
    }

    fn measure(&self, path: &Path) -> FormatResult<ImageSizes> {
        let mut header = [0u8; HEADER_LEN];
        if !read_at(path, 0, &mut header)? {
            return Err(FormatError::InvalidHeader {
                format: "qcow2",
                reason: "file shorter than header".to_string(),
            });
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&header[VERSION_OFFSET..VERSION_OFFSET + 4]);
        let version = u32::from_be_bytes(version);
        if version != 2 && version != 3 {
            return Err(FormatError::InvalidHeader {
                format: "qcow2",
                reason: format!("unsupported version {}", version),
            });
        }

        let mut size = [0u8; 8];
        size.copy_from_slice(&header[SIZE_OFFSET..SIZE_OFFSET + 8]);

        Ok(ImageSizes {
            virtual_size: u64::from_be_bytes(size),
            physical_size: file_len(path)?,
        })
    }
}

/// Build a minimal QCOW2 v3 header describing an empty image of
/// `virtual_size` bytes.
pub fn qcow2_header(virtual_size: u64) -> Vec<u8> {
    let mut header = vec![0u8; 104];
    header[..4].copy_from_slice(&QCOW2_MAGIC);
    header[4..8].copy_from_slice(&3u32.to_be_bytes());
    header[20..24].copy_from_slice(&16u32.to_be_bytes());
    header[24..32].copy_from_slice(&virtual_size.to_be_bytes());
    header
}
