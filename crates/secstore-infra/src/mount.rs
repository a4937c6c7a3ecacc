//! Mount Manager
//!
//! Resolves a share URI (`nfs://host/export`, `cifs://host/share?user=..&password=..`)
//! to a stable directory under the mount root. The directory name is derived
//! from a canonical key (protocol, resolved host IP, remote path), so the same
//! share always lands in the same place. Mounting is skipped when the OS mount
//! table already lists that directory.

use crate::process::{CommandRunner, ProcessError};
use secstore_core::constants::MOUNT_SUBDIRS;
use secstore_core::{AppError, Config, StoreDescriptor, StoreKind};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

const NFS_BASE_OPTIONS: &str = "soft,timeo=133,retrans=2";

#[derive(Debug, Error)]
pub enum MountError {
    #[error("invalid share uri {0}")]
    InvalidUri(String),

    #[error("share {0} requires both user and password query parameters")]
    MissingCredentials(String),

    #[error("unable to resolve host {host}: {reason}")]
    Resolve { host: String, reason: String },

    #[error("{0} stores are not mountable")]
    NotMountable(StoreKind),

    #[error("mount point error: {0}")]
    Io(#[from] std::io::Error),

    #[error("mount of {key} failed: {source}")]
    Command {
        key: String,
        #[source]
        source: ProcessError,
    },
}

impl From<MountError> for AppError {
    fn from(err: MountError) -> Self {
        match err {
            MountError::InvalidUri(_)
            | MountError::MissingCredentials(_)
            | MountError::NotMountable(_) => AppError::InvalidInput(err.to_string()),
            MountError::Command {
                source: ProcessError::Timeout { .. },
                ..
            } => AppError::Timeout(err.to_string()),
            other => AppError::Mount(other.to_string()),
        }
    }
}

/// A share mounted (or found mounted) by this manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    pub canonical_key: String,
    pub local_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Nfs,
    Cifs,
}

impl Protocol {
    fn scheme(self) -> &'static str {
        match self {
            Protocol::Nfs => "nfs",
            Protocol::Cifs => "cifs",
        }
    }
}

struct Share {
    protocol: Protocol,
    host: String,
    path: String,
    user: Option<String>,
    password: Option<String>,
    version: Option<String>,
    domain: Option<String>,
}

impl Share {
    fn parse(uri: &str) -> Result<Self, MountError> {
        let url = Url::parse(uri).map_err(|_| MountError::InvalidUri(redact(uri)))?;
        let protocol = match url.scheme() {
            "nfs" => Protocol::Nfs,
            "cifs" | "smb" => Protocol::Cifs,
            _ => return Err(MountError::InvalidUri(redact(uri))),
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| MountError::InvalidUri(redact(uri)))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let mut path = url.path().trim_end_matches('/').to_string();
        if path.is_empty() {
            path.push('/');
        }

        let mut share = Share {
            protocol,
            host,
            path,
            user: None,
            password: None,
            version: None,
            domain: None,
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "user" => share.user = Some(value.into_owned()),
                "password" => share.password = Some(value.into_owned()),
                "vers" | "version" | "nfsvers" => share.version = Some(value.into_owned()),
                "domain" => share.domain = Some(value.into_owned()),
                _ => {}
            }
        }

        if protocol == Protocol::Cifs && (share.user.is_none() || share.password.is_none()) {
            return Err(MountError::MissingCredentials(redact(uri)));
        }

        Ok(share)
    }
}

/// Strip the query string so credentials never reach logs or answers.
fn redact(uri: &str) -> String {
    uri.split('?').next().unwrap_or(uri).to_string()
}

fn host_for_device(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
    }
}

async fn resolve_host(host: &str) -> Result<IpAddr, MountError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let addrs: Vec<_> = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| MountError::Resolve {
            host: host.to_string(),
            reason: e.to_string(),
        })?
        .collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(|a| a.ip())
        .ok_or_else(|| MountError::Resolve {
            host: host.to_string(),
            reason: "no addresses returned".to_string(),
        })
}

/// Mount table fields escape whitespace as octal (`\040`).
fn decode_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub struct MountManager {
    root: PathBuf,
    mount_table: PathBuf,
    mount_binary: String,
    default_nfs_version: Option<String>,
    timeout: Duration,
    runner: Arc<dyn CommandRunner>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MountManager {
    pub fn new(
        root: PathBuf,
        mount_table: PathBuf,
        mount_binary: String,
        default_nfs_version: Option<String>,
        timeout: Duration,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        MountManager {
            root,
            mount_table,
            mount_binary,
            default_nfs_version,
            timeout,
            runner,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(
            config.mount_root().to_path_buf(),
            config.mount_table_path().to_path_buf(),
            config.mount_binary().to_string(),
            config.nfs_version().map(String::from),
            Duration::from_secs(config.mount_timeout_secs()),
            runner,
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local directory holding the contents of a filesystem-backed store.
    pub async fn resolve(&self, store: &StoreDescriptor) -> Result<PathBuf, MountError> {
        match store {
            StoreDescriptor::Local { path } => {
                tokio::fs::create_dir_all(path).await?;
                Ok(path.clone())
            }
            StoreDescriptor::Nfs { url, nfs_version } => Ok(self
                .resolve_uri(url, nfs_version.as_deref())
                .await?
                .local_path),
            StoreDescriptor::Cifs { url } => Ok(self.resolve_uri(url, None).await?.local_path),
            other => Err(MountError::NotMountable(other.kind())),
        }
    }

    /// Mount `uri` unless it is already mounted and return where it lives.
    /// `version_hint` pins the NFS/SMB protocol version.
    pub async fn resolve_uri(
        &self,
        uri: &str,
        version_hint: Option<&str>,
    ) -> Result<MountRecord, MountError> {
        let share = Share::parse(uri)?;
        let ip = resolve_host(&share.host).await?;
        let canonical_key = format!(
            "{}://{}{}",
            share.protocol.scheme(),
            host_for_device(ip),
            share.path
        );
        let local_path = self.local_dir_for(&canonical_key);
        let record = MountRecord {
            canonical_key: canonical_key.clone(),
            local_path: local_path.clone(),
        };

        let lock = self.key_lock(&canonical_key);
        let _guard = lock.lock().await;

        let created = if tokio::fs::try_exists(&local_path).await? {
            false
        } else {
            tokio::fs::create_dir_all(&local_path).await?;
            true
        };

        match self.mount_if_needed(&share, ip, version_hint, &record).await {
            Ok(()) => Ok(record),
            Err(e) => {
                if created {
                    if let Err(cleanup) = tokio::fs::remove_dir(&local_path).await {
                        tracing::warn!(
                            error = %cleanup,
                            path = %local_path.display(),
                            "Failed to remove mount point after failed mount"
                        );
                    }
                }
                tracing::error!(error = %e, key = %canonical_key, "Mount failed");
                Err(e)
            }
        }
    }

    /// Deterministic mount directory for a canonical key.
    pub fn local_dir_for(&self, canonical_key: &str) -> PathBuf {
        self.root
            .join(Uuid::new_v5(&Uuid::NAMESPACE_URL, canonical_key.as_bytes()).to_string())
    }

    async fn mount_if_needed(
        &self,
        share: &Share,
        ip: IpAddr,
        version_hint: Option<&str>,
        record: &MountRecord,
    ) -> Result<(), MountError> {
        if self.is_mounted(&record.local_path).await? {
            tracing::debug!(
                key = %record.canonical_key,
                path = %record.local_path.display(),
                "Share already mounted"
            );
            return Ok(());
        }

        let start = std::time::Instant::now();
        let args = self.mount_args(share, ip, version_hint, &record.local_path);
        self.runner
            .run_checked(&self.mount_binary, &args, self.timeout)
            .await
            .map_err(|source| MountError::Command {
                key: record.canonical_key.clone(),
                source,
            })?;

        for sub in MOUNT_SUBDIRS {
            tokio::fs::create_dir_all(record.local_path.join(sub)).await?;
        }

        tracing::info!(
            key = %record.canonical_key,
            path = %record.local_path.display(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Share mounted"
        );
        Ok(())
    }

    fn mount_args(
        &self,
        share: &Share,
        ip: IpAddr,
        version_hint: Option<&str>,
        dir: &Path,
    ) -> Vec<String> {
        let host = host_for_device(ip);
        let version = version_hint
            .map(String::from)
            .or_else(|| share.version.clone());
        match share.protocol {
            Protocol::Nfs => {
                let mut options = NFS_BASE_OPTIONS.to_string();
                if let Some(v) = version.or_else(|| self.default_nfs_version.clone()) {
                    options.push_str(&format!(",nfsvers={}", v));
                }
                vec![
                    "-t".to_string(),
                    "nfs".to_string(),
                    "-o".to_string(),
                    options,
                    format!("{}:{}", host, share.path),
                    dir.display().to_string(),
                ]
            }
            Protocol::Cifs => {
                let mut options = format!(
                    "username={},password={}",
                    share.user.as_deref().unwrap_or_default(),
                    share.password.as_deref().unwrap_or_default()
                );
                if let Some(v) = version {
                    options.push_str(&format!(",vers={}", v));
                }
                if let Some(domain) = &share.domain {
                    options.push_str(&format!(",domain={}", domain));
                }
                vec![
                    "-t".to_string(),
                    "cifs".to_string(),
                    "-o".to_string(),
                    options,
                    format!("//{}{}", host, share.path),
                    dir.display().to_string(),
                ]
            }
        }
    }

    async fn is_mounted(&self, dir: &Path) -> Result<bool, MountError> {
        let table = tokio::fs::read_to_string(&self.mount_table).await?;
        Ok(table.lines().any(|line| {
            line.split_whitespace()
                .nth(1)
                .map(|field| Path::new(&decode_mount_field(field)) == dir)
                .unwrap_or(false)
        }))
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
