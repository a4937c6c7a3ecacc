//! `key=value` sidecar files written next to installed templates and volumes

use secstore_core::models::{CatalogEntry, ImageFormat};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sidecar describing one installed image.
    #[allow(clippy::too_many_arguments)]
    pub fn for_image(
        id: u64,
        unique_name: &str,
        file_name: &str,
        description: Option<&str>,
        checksum: Option<&str>,
        format: ImageFormat,
        physical_size: u64,
        virtual_size: u64,
    ) -> Self {
        let mut props = Properties::new();
        let ext = format.extension();
        props.set("filename", file_name);
        props.set("id", id.to_string());
        props.set("uniquename", unique_name);
        props.set("description", description.unwrap_or(unique_name));
        props.set("checksum", checksum.unwrap_or_default());
        props.set("size", physical_size.to_string());
        props.set("virtualsize", virtual_size.to_string());
        props.set("public", "false");
        props.set(ext, "true");
        props.set(format!("{}.filename", ext), file_name);
        props.set(format!("{}.size", ext), physical_size.to_string());
        props.set(format!("{}.virtualsize", ext), virtual_size.to_string());
        props
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// Parse `key=value` lines; blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| l.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        Properties { entries }
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{}={}\n", k, v))
            .collect()
    }

    pub fn read_from(path: &Path) -> io::Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// Written to a temporary name and renamed so readers never see a
    /// partial file.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        let tmp = path.with_extension("properties.tmp");
        std::fs::write(&tmp, self.render())?;
        std::fs::rename(&tmp, path)
    }

    /// First format flagged `<fmt>=true`.
    pub fn format(&self) -> Option<ImageFormat> {
        ImageFormat::ALL
            .into_iter()
            .find(|f| self.get(f.extension()) == Some("true"))
    }

    /// Listing entry for the sidecar found in directory `dir` (store-relative).
    pub fn to_catalog_entry(&self, dir: &str) -> Option<CatalogEntry> {
        let file_name = self.get("filename")?;
        let name = self
            .get("uniquename")
            .filter(|n| !n.is_empty())
            .unwrap_or(file_name);
        let physical_size = self.get_u64("size").unwrap_or(0);
        Some(CatalogEntry {
            id: self.get_u64("id"),
            name: name.to_string(),
            path: format!("{}/{}", dir.trim_end_matches('/'), file_name),
            format: self.format(),
            physical_size,
            virtual_size: self
                .get_u64("virtualsize")
                .unwrap_or(physical_size)
                .max(physical_size),
            checksum: self
                .get("checksum")
                .filter(|c| !c.is_empty())
                .map(String::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_image_properties_round_trip_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("template.properties");
        let props = Properties::for_image(
            201,
            "centos-9",
            "5b1c.qcow2",
            None,
            None,
            ImageFormat::Qcow2,
            1_048_576,
            10_737_418_240,
        );
        props.write_to(&path).unwrap();

        let read = Properties::read_from(&path).unwrap();
        assert_eq!(read, props);
        assert_eq!(read.get("qcow2"), Some("true"));
        assert_eq!(read.get("qcow2.filename"), Some("5b1c.qcow2"));
        assert_eq!(read.get("description"), Some("centos-9"));
        assert_eq!(read.format(), Some(ImageFormat::Qcow2));
        assert!(!dir.path().join("template.properties.tmp").exists());
    }

    #[test]
    fn test_parse_skips_comments_and_garbage() {
        let props = Properties::parse("# header\nfilename = a.img\n\nnot a pair\nsize=10\n");
        assert_eq!(props.get("filename"), Some("a.img"));
        assert_eq!(props.get_u64("size"), Some(10));
        assert_eq!(props.get("not a pair"), None);
    }

    #[test]
    fn test_catalog_entry() {
        let props = Properties::parse(
            "filename=disk.vhd\nid=9\nuniquename=win\nsize=100\nvirtualsize=50\nvhd=true\nchecksum=\n",
        );
        let entry = props.to_catalog_entry("volumes/2/9").unwrap();
        assert_eq!(entry.id, Some(9));
        assert_eq!(entry.name, "win");
        assert_eq!(entry.path, "volumes/2/9/disk.vhd");
        assert_eq!(entry.format, Some(ImageFormat::Vhd));
        assert_eq!(entry.virtual_size, 100);
        assert_eq!(entry.checksum, None);
    }
}
