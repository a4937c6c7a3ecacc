//! File digests for `ComputeChecksum` and download verification

use secstore_core::constants::DEFAULT_CHECKSUM_ALGORITHM;
use secstore_core::AppError;
use sha2::{Digest, Sha256, Sha512};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

const READ_BUFFER: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    /// Parse an optional algorithm name, defaulting to sha256.
    pub fn from_option(name: Option<&str>) -> Result<Self, AppError> {
        name.unwrap_or(DEFAULT_CHECKSUM_ALGORITHM).parse()
    }

    /// Infer the algorithm from a hex digest's length.
    pub fn for_digest(hex_digest: &str) -> Option<Self> {
        match hex_digest.trim().len() {
            64 => Some(ChecksumAlgorithm::Sha256),
            128 => Some(ChecksumAlgorithm::Sha512),
            _ => None,
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            other => Err(AppError::InvalidInput(format!(
                "unsupported checksum algorithm: {}",
                other
            ))),
        }
    }
}

impl Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

/// Hex digest of a file. Blocking; run it on a blocking thread.
pub fn compute_checksum(path: &Path, algorithm: ChecksumAlgorithm) -> std::io::Result<String> {
    match algorithm {
        ChecksumAlgorithm::Sha256 => digest_file::<Sha256>(path),
        ChecksumAlgorithm::Sha512 => digest_file::<Sha512>(path),
    }
}

fn digest_file<D: Digest>(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = D::new();
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compare a computed digest with an expected one, case-insensitively.
pub fn verify_checksum(path: &Path, expected: &str) -> Result<String, AppError> {
    let algorithm = ChecksumAlgorithm::for_digest(expected).ok_or_else(|| {
        AppError::InvalidInput(format!("checksum {} is not a sha256 or sha512 digest", expected))
    })?;
    let actual = compute_checksum(path, algorithm)?;
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(AppError::InvalidInput(format!(
            "checksum mismatch: expected {}, computed {}",
            expected.trim(),
            actual
        )));
    }
    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_known_digests() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc");
        std::fs::write(&path, b"abc").unwrap();

        assert_eq!(
            compute_checksum(&path, ChecksumAlgorithm::Sha256).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            compute_checksum(&path, ChecksumAlgorithm::Sha512).unwrap(),
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
             2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
        );
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!(
            ChecksumAlgorithm::from_option(None).unwrap(),
            ChecksumAlgorithm::Sha256
        );
        assert_eq!(
            ChecksumAlgorithm::from_option(Some("SHA-512")).unwrap(),
            ChecksumAlgorithm::Sha512
        );
        assert!(ChecksumAlgorithm::from_option(Some("md5")).is_err());
    }

    #[test]
    fn test_verify_checksum() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc");
        std::fs::write(&path, b"abc").unwrap();

        assert!(verify_checksum(
            &path,
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
        )
        .is_ok());
        let err = verify_checksum(&path, &"0".repeat(64)).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
        assert!(verify_checksum(&path, "abcd").is_err());
    }
}
