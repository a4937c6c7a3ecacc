use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Storage backend kinds understood by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Local,
    Nfs,
    Cifs,
    S3,
    Swift,
}

impl StoreKind {
    /// Stores whose content is reachable through a local directory.
    pub fn is_filesystem(self) -> bool {
        matches!(self, StoreKind::Local | StoreKind::Nfs | StoreKind::Cifs)
    }

    pub fn is_object_store(self) -> bool {
        !self.is_filesystem()
    }
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StoreKind::Local),
            "nfs" => Ok(StoreKind::Nfs),
            "cifs" | "smb" => Ok(StoreKind::Cifs),
            "s3" => Ok(StoreKind::S3),
            "swift" => Ok(StoreKind::Swift),
            _ => Err(anyhow::anyhow!("Invalid store kind: {}", s)),
        }
    }
}

impl Display for StoreKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StoreKind::Local => write!(f, "local"),
            StoreKind::Nfs => write!(f, "nfs"),
            StoreKind::Cifs => write!(f, "cifs"),
            StoreKind::S3 => write!(f, "s3"),
            StoreKind::Swift => write!(f, "swift"),
        }
    }
}

/// A storage backend referenced by value in every command.
///
/// Credentials travel with the descriptor; the agent keeps no long-lived
/// handle per store. `Display` never prints secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreDescriptor {
    /// A directory on local disk. Never mounted.
    Local { path: PathBuf },
    /// `nfs://host/export/path`
    Nfs {
        url: String,
        #[serde(default)]
        nfs_version: Option<String>,
    },
    /// `cifs://host/share/path?user=..&password=..`
    Cifs { url: String },
    /// S3-compatible object store.
    S3 {
        bucket: String,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
        access_key: String,
        secret_key: String,
        #[serde(default)]
        prefix: Option<String>,
    },
    /// OpenStack Swift, v1 auth.
    Swift {
        url: String,
        account: String,
        user: String,
        key: String,
        container: String,
    },
}

impl StoreDescriptor {
    pub fn kind(&self) -> StoreKind {
        match self {
            StoreDescriptor::Local { .. } => StoreKind::Local,
            StoreDescriptor::Nfs { .. } => StoreKind::Nfs,
            StoreDescriptor::Cifs { .. } => StoreKind::Cifs,
            StoreDescriptor::S3 { .. } => StoreKind::S3,
            StoreDescriptor::Swift { .. } => StoreKind::Swift,
        }
    }

    pub fn is_filesystem(&self) -> bool {
        self.kind().is_filesystem()
    }

    pub fn is_object_store(&self) -> bool {
        self.kind().is_object_store()
    }
}

impl Display for StoreDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StoreDescriptor::Local { path } => write!(f, "local:{}", path.display()),
            StoreDescriptor::Nfs { url, .. } => write!(f, "{}", url),
            StoreDescriptor::Cifs { url } => {
                // Query carries the share credentials.
                let shown = url.split('?').next().unwrap_or(url);
                write!(f, "{}", shown)
            }
            StoreDescriptor::S3 { bucket, .. } => write!(f, "s3://{}", bucket),
            StoreDescriptor::Swift { url, container, .. } => {
                write!(f, "swift:{}/{}", url.trim_end_matches('/'), container)
            }
        }
    }
}
