//! Startup checks
//!
//! Missing tools, helper scripts or the upload key are configuration errors:
//! the agent refuses to start.

use anyhow::{Context, Result};
use secstore_core::Config;
use std::path::Path;

/// Validate configuration values and the host tools the agent shells out to.
pub fn validate_config(config: &Config) -> Result<()> {
    config.validate()?;

    if config.is_production() && config.service_api_key().is_none() {
        tracing::warn!("SERVICE_API_KEY is not set - the command endpoint is unauthenticated");
    }

    require_binary("MOUNT_BINARY", config.mount_binary())?;
    if config.firewall_manage() {
        require_binary("IPTABLES_BINARY", config.iptables_binary())?;
    }

    if let Some(helper) = config.snapshot_template_helper() {
        if !helper.is_file() {
            anyhow::bail!(
                "SNAPSHOT_TEMPLATE_HELPER {} does not exist",
                helper.display()
            );
        }
    }

    Ok(())
}

fn require_binary(name: &str, binary: &str) -> Result<()> {
    let path = which::which(binary)
        .with_context(|| format!("{} '{}' was not found on PATH", name, binary))?;
    tracing::debug!(tool = %name, path = %path.display(), "Resolved external tool");
    Ok(())
}

/// Read the pre-shared upload key. Trailing whitespace (a final newline) is
/// not part of the key.
pub fn read_upload_key(path: &Path) -> Result<Vec<u8>> {
    let raw = std::fs::read(path)
        .with_context(|| format!("cannot read upload key file {}", path.display()))?;
    let len = raw
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    if len == 0 {
        anyhow::bail!("upload key file {} is empty", path.display());
    }
    Ok(raw[..len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_upload_key_strips_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.key");
        std::fs::write(&path, "s3cr3t\n").unwrap();
        assert_eq!(read_upload_key(&path).unwrap(), b"s3cr3t");
    }

    #[test]
    fn test_empty_or_missing_key_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.key");
        assert!(read_upload_key(&path).is_err());
        std::fs::write(&path, " \n").unwrap();
        assert!(read_upload_key(&path).is_err());
    }

    #[test]
    fn test_missing_binary_is_fatal() {
        assert!(require_binary("MOUNT_BINARY", "definitely-not-a-real-mount-tool").is_err());
    }

    #[test]
    fn test_missing_helper_is_fatal() {
        let mut agent = secstore_core::AgentConfig::default();
        agent.mount_binary = "sh".to_string();
        agent.snapshot_template_helper = Some("/nonexistent/convert-snapshot.sh".into());
        assert!(validate_config(&Config::new(agent)).is_err());
    }
}
