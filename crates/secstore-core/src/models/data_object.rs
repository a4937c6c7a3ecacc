use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Disk-image formats the agent can store and measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Raw,
    Qcow2,
    Vhd,
    Vmdk,
    Ova,
    Tar,
    Iso,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 7] = [
        ImageFormat::Raw,
        ImageFormat::Qcow2,
        ImageFormat::Vhd,
        ImageFormat::Vmdk,
        ImageFormat::Ova,
        ImageFormat::Tar,
        ImageFormat::Iso,
    ];

    /// File extension used in the canonical layout.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Raw => "img",
            ImageFormat::Qcow2 => "qcow2",
            ImageFormat::Vhd => "vhd",
            ImageFormat::Vmdk => "vmdk",
            ImageFormat::Ova => "ova",
            ImageFormat::Tar => "tar",
            ImageFormat::Iso => "iso",
        }
    }

    /// Guess a format from a file name, ignoring a trailing `.gz`/`.bz2`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        let stem = lower
            .strip_suffix(".gz")
            .or_else(|| lower.strip_suffix(".bz2"))
            .unwrap_or(&lower);
        let ext = stem.rsplit('.').next()?;
        match ext {
            "img" | "raw" => Some(ImageFormat::Raw),
            other => other.parse().ok(),
        }
    }
}

impl FromStr for ImageFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" | "img" => Ok(ImageFormat::Raw),
            "qcow2" => Ok(ImageFormat::Qcow2),
            "vhd" => Ok(ImageFormat::Vhd),
            "vmdk" => Ok(ImageFormat::Vmdk),
            "ova" => Ok(ImageFormat::Ova),
            "tar" => Ok(ImageFormat::Tar),
            "iso" => Ok(ImageFormat::Iso),
            _ => Err(anyhow::anyhow!("Unsupported image format: {}", s)),
        }
    }
}

impl Display for ImageFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let s = match self {
            ImageFormat::Raw => "raw",
            ImageFormat::Qcow2 => "qcow2",
            ImageFormat::Vhd => "vhd",
            ImageFormat::Vmdk => "vmdk",
            ImageFormat::Ova => "ova",
            ImageFormat::Tar => "tar",
            ImageFormat::Iso => "iso",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Template,
    Volume,
    Snapshot,
}

impl Display for ObjectKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ObjectKind::Template => write!(f, "template"),
            ObjectKind::Volume => write!(f, "volume"),
            ObjectKind::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Hypervisor family an object was produced for. Only matters for the
/// snapshot-to-template conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hypervisor {
    Kvm,
    Xen,
    Vmware,
    Hyperv,
}

/// A template, volume or snapshot inside a store.
///
/// Identity is `(kind, id)`; `path` is relative to the store root and may be
/// recomputed by the mover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataObject {
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub path: String,
    pub format: ImageFormat,
    #[serde(default)]
    pub physical_size: u64,
    #[serde(default)]
    pub virtual_size: u64,
    pub account_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypervisor: Option<Hypervisor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Parent volume of a snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_id: Option<u64>,
}

impl DataObject {
    pub fn is_snapshot(&self) -> bool {
        self.kind == ObjectKind::Snapshot
    }

    /// A copy of this descriptor carrying a new path and sizes.
    pub fn with_result(&self, path: String, physical_size: u64, virtual_size: u64) -> Self {
        DataObject {
            path,
            physical_size,
            virtual_size: virtual_size.max(physical_size),
            ..self.clone()
        }
    }
}

/// One entry of a template or volume listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: Option<u64>,
    pub name: String,
    pub path: String,
    pub format: Option<ImageFormat>,
    pub physical_size: u64,
    pub virtual_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_file_name() {
        assert_eq!(
            ImageFormat::from_file_name("centos.qcow2"),
            Some(ImageFormat::Qcow2)
        );
        assert_eq!(
            ImageFormat::from_file_name("centos.qcow2.gz"),
            Some(ImageFormat::Qcow2)
        );
        assert_eq!(
            ImageFormat::from_file_name("disk.IMG"),
            Some(ImageFormat::Raw)
        );
        assert_eq!(ImageFormat::from_file_name("README"), None);
    }

    #[test]
    fn test_with_result_keeps_virtual_at_least_physical() {
        let object = DataObject {
            kind: ObjectKind::Template,
            id: 201,
            name: "tiny".to_string(),
            path: String::new(),
            format: ImageFormat::Raw,
            physical_size: 0,
            virtual_size: 0,
            account_id: 2,
            hypervisor: None,
            checksum: None,
            volume_id: None,
        };
        let result = object.with_result("template/tmpl/2/201/a.img".to_string(), 4096, 0);
        assert_eq!(result.physical_size, 4096);
        assert_eq!(result.virtual_size, 4096);
        assert_eq!(result.id, 201);
    }

    #[test]
    fn test_object_kind_serializes_as_type() {
        let json = r#"{"type":"snapshot","id":9,"name":"s","format":"qcow2","account_id":1,"volume_id":4}"#;
        let object: DataObject = serde_json::from_str(json).unwrap();
        assert!(object.is_snapshot());
        assert_eq!(object.volume_id, Some(4));
        assert!(object.path.is_empty());
    }
}
