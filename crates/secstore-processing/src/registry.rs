//! Ordered set of format processors

use std::path::Path;

use secstore_core::models::ImageFormat;

use crate::error::{FormatError, FormatResult};
use crate::formats::{
    IsoProcessor, OvaProcessor, Qcow2Processor, RawProcessor, TarProcessor, VhdProcessor,
    VmdkProcessor,
};
use crate::traits::{FormatMatch, FormatProcessor};

/// Processors tried in order; the first that recognizes the signature and
/// parses its header wins. Raw is the catch-all and always last.
pub struct ProcessorSet {
    processors: Vec<Box<dyn FormatProcessor>>,
}

impl Default for ProcessorSet {
    fn default() -> Self {
        ProcessorSet {
            processors: vec![
                Box::new(Qcow2Processor),
                Box::new(VhdProcessor),
                Box::new(VmdkProcessor),
                Box::new(OvaProcessor),
                Box::new(TarProcessor),
                Box::new(IsoProcessor),
                Box::new(RawProcessor),
            ],
        }
    }
}

impl ProcessorSet {
    pub fn new(processors: Vec<Box<dyn FormatProcessor>>) -> Self {
        ProcessorSet { processors }
    }

    /// Identify and measure `path`.
    pub fn probe(&self, path: &Path) -> FormatResult<FormatMatch> {
        for processor in &self.processors {
            match processor.detect(path) {
                Ok(Some(found)) => return Ok(found),
                Ok(None) => {}
                Err(FormatError::Io(e)) => return Err(FormatError::Io(e)),
                Err(e) => {
                    tracing::debug!(
                        path = %path.display(),
                        format = %processor.format(),
                        error = %e,
                        "Signature matched but header did not parse"
                    );
                }
            }
        }
        let physical_size = std::fs::metadata(path)?.len();
        Ok(FormatMatch {
            format: ImageFormat::Raw,
            virtual_size: physical_size,
            physical_size,
        })
    }

    /// Best-effort sizing: falls back to physical size when probing fails.
    pub fn sizes_or_physical(&self, path: &Path) -> FormatResult<(u64, u64)> {
        match self.probe(path) {
            Ok(found) => Ok((found.virtual_size, found.physical_size)),
            Err(FormatError::Io(e)) => Err(FormatError::Io(e)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Format probe failed");
                let physical = std::fs::metadata(path)?.len();
                Ok((physical, physical))
            }
        }
    }

    /// Probe and require the detected format to equal `declared`.
    pub fn verify(&self, path: &Path, declared: ImageFormat) -> FormatResult<FormatMatch> {
        let found = self.probe(path)?;
        if found.format != declared {
            return Err(FormatError::Mismatch {
                declared: declared.to_string(),
                detected: found.format.to_string(),
            });
        }
        Ok(found)
    }

    /// Probe and log, but do not fail, when the detected format differs
    /// from `declared`.
    pub fn probe_expecting(&self, path: &Path, declared: ImageFormat) -> FormatResult<FormatMatch> {
        let found = self.probe(path)?;
        if found.format != declared {
            tracing::warn!(
                path = %path.display(),
                declared = %declared,
                detected = %found.format,
                "Detected format differs from declared format"
            );
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::qcow2_header;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_unknown_bytes_fall_back_to_raw() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![7u8; 1000]).unwrap();

        let found = ProcessorSet::default().probe(file.path()).unwrap();
        assert_eq!(found.format, ImageFormat::Raw);
        assert_eq!(found.virtual_size, 1000);
        assert_eq!(found.physical_size, 1000);
    }

    #[test]
    fn test_verify_reports_mismatch() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; 4096]).unwrap();

        let err = ProcessorSet::default()
            .verify(file.path(), ImageFormat::Qcow2)
            .unwrap_err();
        match err {
            FormatError::Mismatch { declared, detected } => {
                assert_eq!(declared, "qcow2");
                assert_eq!(detected, "raw");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_broken_qcow2_header_falls_through() {
        let mut header = qcow2_header(1 << 30);
        header[4..8].copy_from_slice(&42u32.to_be_bytes());
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&header).unwrap();

        let found = ProcessorSet::default().probe(file.path()).unwrap();
        assert_eq!(found.format, ImageFormat::Raw);
    }

    #[test]
    fn test_probe_expecting_keeps_sizes_on_mismatch() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&qcow2_header(1 << 30)).unwrap();

        let found = ProcessorSet::default()
            .probe_expecting(file.path(), ImageFormat::Raw)
            .unwrap();
        assert_eq!(found.format, ImageFormat::Qcow2);
        assert_eq!(found.virtual_size, 1 << 30);
    }
}
