//! Decompression and archive unpacking applied after a transfer
//!
//! Sizes are always measured on the artifact these functions return, never
//! on the transport file.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{FormatError, FormatResult};
use crate::formats::OvaProcessor;
use crate::traits::FormatProcessor;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const DISK_EXTENSIONS: [&str; 5] = ["vmdk", "vhd", "qcow2", "img", "raw"];

pub fn is_gzip(path: &Path) -> io::Result<bool> {
    let mut magic = [0u8; 2];
    let mut file = File::open(path)?;
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == GZIP_MAGIC),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Decompress `path` next to itself and remove the compressed file.
/// `disk.qcow2.gz` becomes `disk.qcow2`; names without `.gz` get `.unpacked`.
pub fn gunzip_in_place(path: &Path) -> FormatResult<PathBuf> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FormatError::Archive(format!("invalid file name {}", path.display())))?;
    let target_name = match name.strip_suffix(".gz") {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => format!("{}.unpacked", name),
    };
    let target = path.with_file_name(target_name);

    let mut decoder = flate2::read::GzDecoder::new(BufReader::new(File::open(path)?));
    let mut out = BufWriter::new(File::create(&target)?);
    if let Err(e) = io::copy(&mut decoder, &mut out) {
        let _ = fs::remove_file(&target);
        return Err(FormatError::Archive(format!(
            "failed to decompress {}: {}",
            path.display(),
            e
        )));
    }
    drop(out);
    fs::remove_file(path)?;

    tracing::debug!(from = %path.display(), to = %target.display(), "Decompressed image");
    Ok(target)
}

/// Unpack a tar archive into `dest`, refusing entries that escape it.
pub fn unpack_tar(archive_path: &Path, dest: &Path) -> FormatResult<Vec<PathBuf>> {
    fs::create_dir_all(dest)?;
    let mut archive = tar::Archive::new(File::open(archive_path)?);
    let mut unpacked = Vec::new();
    let entries = archive
        .entries()
        .map_err(|e| FormatError::Archive(format!("{}: {}", archive_path.display(), e)))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| FormatError::Archive(format!("{}: {}", archive_path.display(), e)))?;
        let relative = entry
            .path()
            .map_err(|e| FormatError::Archive(e.to_string()))?
            .into_owned();
        let written = entry
            .unpack_in(dest)
            .map_err(|e| FormatError::Archive(format!("{}: {}", relative.display(), e)))?;
        if !written {
            return Err(FormatError::Archive(format!(
                "entry {} escapes the destination",
                relative.display()
            )));
        }
        unpacked.push(dest.join(relative));
    }
    fix_permissions(dest)?;
    Ok(unpacked)
}

/// Files 0644, directories 0755.
pub fn fix_permissions(root: &Path) -> FormatResult<()> {
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| FormatError::Io(io::Error::other(e.to_string())))?;
        let mode = if entry.file_type().is_dir() { 0o755 } else { 0o644 };
        if entry.file_type().is_symlink() {
            continue;
        }
        fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

/// Normalize a freshly transferred template or volume file: decompress
/// gzip, unpack OVA appliances next to the archive. Returns the file whose
/// sizes should be recorded.
pub fn post_process(path: &Path) -> FormatResult<PathBuf> {
    let mut current = path.to_path_buf();

    if is_gzip(&current)? {
        current = gunzip_in_place(&current)?;
    }

    if OvaProcessor.recognizes(&current)? {
        let dir = current
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let members = unpack_tar(&current, &dir)?;
        let disk = members
            .iter()
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| DISK_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .filter_map(|p| fs::metadata(p).ok().map(|m| (p.clone(), m.len())))
            .max_by_key(|(_, len)| *len)
            .map(|(p, _)| p);
        if let Some(disk) = disk {
            fs::remove_file(&current)?;
            tracing::debug!(archive = %current.display(), disk = %disk.display(), "Unpacked appliance");
            current = disk;
        }
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_tar(path: &Path, members: &[(&str, &[u8])]) {
        let mut builder = tar::Builder::new(File::create(path).unwrap());
        for (name, data) in members {
            let mut header = tar::Header::new_ustar();
            header.set_size(data.len() as u64);
            header.set_mode(0o600);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.finish().unwrap();
    }

    #[test]
    fn test_gunzip_replaces_compressed_file() {
        let dir = tempdir().unwrap();
        let gz = dir.path().join("disk.img.gz");
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::fast());
        encoder.write_all(&vec![1u8; 10_000]).unwrap();
        encoder.finish().unwrap();

        assert!(is_gzip(&gz).unwrap());
        let out = post_process(&gz).unwrap();
        assert_eq!(out, dir.path().join("disk.img"));
        assert!(!gz.exists());
        assert_eq!(fs::metadata(&out).unwrap().len(), 10_000);
    }

    #[test]
    fn test_ova_unpacks_to_largest_disk() {
        let dir = tempdir().unwrap();
        let ova = dir.path().join("appliance.ova");
        write_tar(
            &ova,
            &[
                ("appliance.ovf", b"<Envelope><Disk ovf:capacity=\"1\"/></Envelope>".as_slice()),
                ("appliance-disk1.vmdk", [0u8; 4096].as_slice()),
                ("appliance-disk2.vmdk", [0u8; 1024].as_slice()),
            ],
        );

        let out = post_process(&ova).unwrap();
        assert_eq!(out, dir.path().join("appliance-disk1.vmdk"));
        assert!(!ova.exists());
        assert!(dir.path().join("appliance.ovf").exists());
        let mode = fs::metadata(&out).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn test_plain_file_is_untouched() {
        let dir = tempdir().unwrap();
        let raw = dir.path().join("disk.img");
        fs::write(&raw, vec![0u8; 512]).unwrap();
        assert_eq!(post_process(&raw).unwrap(), raw);
        assert!(raw.exists());
    }
}
