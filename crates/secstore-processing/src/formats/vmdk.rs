use std::io::Read;
use std::path::Path;

use regex::Regex;
use secstore_core::models::ImageFormat;

use super::{file_len, read_at};
use crate::error::{FormatError, FormatResult};
use crate::traits::{FormatProcessor, ImageSizes};

const SPARSE_MAGIC: &[u8; 4] = b"KDMV";
const DESCRIPTOR_MARKER: &[u8] = b"# Disk DescriptorFile";
const SECTOR: u64 = 512;
const MAX_DESCRIPTOR: u64 = 64 * 1024;

/// VMDK images: either a hosted sparse extent (`KDMV` header, capacity in
/// sectors) or a standalone text descriptor listing its extents.
pub struct VmdkProcessor;

impl VmdkProcessor {
    fn descriptor_capacity(path: &Path) -> FormatResult<Option<u64>> {
        let len = file_len(path)?;
        if len > MAX_DESCRIPTOR {
            return Ok(None);
        }
        let mut text = String::new();
        std::fs::File::open(path)?
            .take(MAX_DESCRIPTOR)
            .read_to_string(&mut text)
            .map_err(|e| FormatError::InvalidHeader {
                format: "vmdk",
                reason: format!("descriptor is not text: {}", e),
            })?;
        let extent_line = Regex::new(r"(?m)^\s*(?:RW|RDONLY|NOACCESS)\s+(\d+)\s+\w+")
            .map_err(|e| FormatError::InvalidHeader {
                format: "vmdk",
                reason: format!("extent pattern: {}", e),
            })?;
        let sectors: u64 = extent_line
            .captures_iter(&text)
            .filter_map(|c| c.get(1)?.as_str().parse::<u64>().ok())
            .sum();
        Ok(Some(sectors * SECTOR))
    }
}

impl FormatProcessor for VmdkProcessor {
    fn format(&self) -> ImageFormat {
        ImageFormat::Vmdk
    }

    fn recognizes(&self, path: &Path) -> FormatResult<bool> {
        let mut head = [0u8; 21];
        if read_at(path, 0, &mut head[..4])? && &head[..4] == SPARSE_MAGIC {
            return Ok(true);
        }
        Ok(read_at(path, 0, &mut head)? && head.as_slice() == DESCRIPTOR_MARKER)
    }

    fn measure(&self, path: &Path) -> FormatResult<ImageSizes> {
        let physical_size = file_len(path)?;
        let mut header = [0u8; 20];
        if read_at(path, 0, &mut header)? && &header[..4] == SPARSE_MAGIC {
            let mut capacity = [0u8; 8];
            capacity.copy_from_slice(&header[12..20]);
            return Ok(ImageSizes {
                virtual_size: u64::from_le_bytes(capacity) * SECTOR,
                physical_size,
            });
        }

        match Self::descriptor_capacity(path)? {
            Some(virtual_size) => Ok(ImageSizes {
                virtual_size,
                physical_size,
            }),
            None => Err(FormatError::InvalidHeader {
                format: "vmdk",
                reason: "descriptor too large".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_sparse_extent_capacity() {
        let mut header = vec![0u8; 512];
        header[..4].copy_from_slice(SPARSE_MAGIC);
        header[4..8].copy_from_slice(&1u32.to_le_bytes());
        header[12..20].copy_from_slice(&(2048u64).to_le_bytes());
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&header).unwrap();

        let found = VmdkProcessor.detect(file.path()).unwrap().unwrap();
        assert_eq!(found.virtual_size, 2048 * 512);
        assert_eq!(found.physical_size, 512);
    }

    #[test]
    fn test_descriptor_sums_extents() {
        let descriptor = "# Disk DescriptorFile\nversion=1\nCID=fffffffe\n\n\
            # Extent description\nRW 4192256 SPARSE \"disk-s001.vmdk\"\nRW 2048 SPARSE \"disk-s002.vmdk\"\n";
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(descriptor.as_bytes()).unwrap();

        let sizes = VmdkProcessor.measure(file.path()).unwrap();
        assert_eq!(sizes.virtual_size, (4192256 + 2048) * 512);
    }
}
