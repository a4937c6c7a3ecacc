//! Format processors, one per supported disk-image format

mod iso;
mod ova;
mod qcow2;
mod raw;
mod tar;
mod vhd;
mod vmdk;

pub use iso::IsoProcessor;
pub use ova::OvaProcessor;
pub use qcow2::{qcow2_header, Qcow2Processor};
pub use raw::RawProcessor;
pub use tar::TarProcessor;
pub use vhd::VhdProcessor;
pub use vmdk::VmdkProcessor;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Read exactly `buf.len()` bytes at `offset`. Returns `false` when the file
/// is too short.
pub(crate) fn read_at(path: &Path, offset: u64, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if offset + buf.len() as u64 > len {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)?;
    Ok(true)
}

pub(crate) fn file_len(path: &Path) -> std::io::Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

/// `ustar` magic at offset 257 of the first tar header.
pub(crate) fn is_ustar(path: &Path) -> std::io::Result<bool> {
    let mut magic = [0u8; 5];
    Ok(read_at(path, 257, &mut magic)? && &magic == b"ustar")
}
