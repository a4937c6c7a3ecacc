//! Public download links
//!
//! An entity is made downloadable by symlinking it into a directory served
//! under `/userdata`. Removing the link revokes the URL.

use secstore_core::AppError;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DownloadLinks {
    dir: PathBuf,
    base_url: String,
}

impl DownloadLinks {
    pub fn new(dir: PathBuf, base_url: impl Into<String>) -> Self {
        DownloadLinks {
            dir,
            base_url: base_url.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Link `target` as `link_name` and return its public URL. An existing
    /// link with the same name is replaced.
    pub async fn create(&self, target: &Path, link_name: &str) -> Result<String, AppError> {
        validate_link_name(link_name)?;
        if !tokio::fs::try_exists(target).await? {
            return Err(AppError::NotFound(format!(
                "{} does not exist",
                target.display()
            )));
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let link = self.dir.join(link_name);
        if tokio::fs::symlink_metadata(&link).await.is_ok() {
            tokio::fs::remove_file(&link).await?;
        }
        tokio::fs::symlink(target, &link).await?;

        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), link_name);
        tracing::info!(target = %target.display(), link = %link.display(), url = %url, "Download link created");
        Ok(url)
    }

    /// Remove `link_name`; a missing link is not an error.
    pub async fn delete(&self, link_name: &str) -> Result<bool, AppError> {
        validate_link_name(link_name)?;
        let link = self.dir.join(link_name);
        match tokio::fs::remove_file(&link).await {
            Ok(()) => {
                tracing::info!(link = %link.display(), "Download link removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn validate_link_name(name: &str) -> Result<(), AppError> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(AppError::InvalidInput(format!(
            "invalid download link name: {:?}",
            name
        )));
    }
    Ok(())
}
