use std::fs::File;
use std::io::Read;
use std::path::Path;

use regex::Regex;
use secstore_core::models::ImageFormat;

use super::{file_len, is_ustar};
use crate::error::{FormatError, FormatResult};
use crate::traits::{FormatProcessor, ImageSizes};

const MAX_OVF_BYTES: u64 = 4 * 1024 * 1024;

/// OVA appliances: a tar archive whose members include an `.ovf` descriptor.
/// Virtual size is the sum of the disk capacities the descriptor declares.
pub struct OvaProcessor;

impl OvaProcessor {
    fn read_ovf(path: &Path) -> FormatResult<Option<String>> {
        let mut archive = tar::Archive::new(File::open(path)?);
        let entries = archive
            .entries()
            .map_err(|e| FormatError::Archive(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| FormatError::Archive(e.to_string()))?;
            let is_ovf = entry
                .path()
                .ok()
                .and_then(|p| p.extension().map(|e| e.eq_ignore_ascii_case("ovf")))
                .unwrap_or(false);
            if is_ovf {
                let mut text = String::new();
                entry
                    .take(MAX_OVF_BYTES)
                    .read_to_string(&mut text)
                    .map_err(|e| FormatError::Archive(format!("unreadable descriptor: {}", e)))?;
                return Ok(Some(text));
            }
        }
        Ok(None)
    }

    /// Sum of `<Disk ovf:capacity=...>` values, honouring
    /// `capacityAllocationUnits="byte * 2^N"`.
    pub fn declared_capacity(ovf: &str) -> FormatResult<u64> {
        let pattern = |re: &str| {
            Regex::new(re).map_err(|e| FormatError::InvalidHeader {
                format: "ova",
                reason: format!("descriptor pattern: {}", e),
            })
        };
        let disk = pattern(r"<(?:ovf:)?Disk\b[^>]*>")?;
        let capacity = pattern(r#"capacity="(\d+)""#)?;
        let units = pattern(r#"capacityAllocationUnits="byte\s*\*\s*2\^(\d+)""#)?;

        let mut total = 0u64;
        for element in disk.find_iter(ovf) {
            let element = element.as_str();
            let Some(value) = capacity
                .captures(element)
                .and_then(|c| c[1].parse::<u64>().ok())
            else {
                continue;
            };
            let shift = units
                .captures(element)
                .and_then(|c| c[1].parse::<u32>().ok())
                .unwrap_or(0);
            total = total.saturating_add(value.saturating_mul(1u64 << shift.min(62)));
        }
        Ok(total)
    }
}

impl FormatProcessor for OvaProcessor {
    fn format(&self) -> ImageFormat {
        ImageFormat::Ova
    }

    fn recognizes(&self, path: &Path) -> FormatResult<bool> {
        if !is_ustar(path)? {
            return Ok(false);
        }
        Ok(Self::read_ovf(path)?.is_some())
    }

    fn measure(&self, path: &Path) -> FormatResult<ImageSizes> {
        let physical_size = file_len(path)?;
        let ovf = Self::read_ovf(path)?.ok_or_else(|| FormatError::InvalidHeader {
            format: "ova",
            reason: "archive has no .ovf descriptor".to_string(),
        })?;
        let declared = Self::declared_capacity(&ovf)?;
        Ok(ImageSizes {
            virtual_size: if declared > 0 { declared } else { physical_size },
            physical_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_capacity_with_units() {
        let ovf = r#"<DiskSection>
            <Disk ovf:capacity="20" ovf:capacityAllocationUnits="byte * 2^30" ovf:diskId="vmdisk1"/>
            <Disk ovf:capacity="1048576" ovf:diskId="vmdisk2"/>
        </DiskSection>"#;
        let total = OvaProcessor::declared_capacity(ovf).unwrap();
        assert_eq!(total, 20 * (1 << 30) + 1048576);
    }

    #[test]
    fn test_descriptor_without_disks() {
        assert_eq!(OvaProcessor::declared_capacity("<Envelope/>").unwrap(), 0);
    }
}
