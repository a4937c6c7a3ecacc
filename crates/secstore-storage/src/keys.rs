//! Object key helpers shared by all backends.
//!
//! Keys mirror the filesystem layout of a secondary store
//! (`template/tmpl/<account>/<id>/<file>` and so on) below an optional
//! store prefix.

use crate::traits::{StorageError, StorageResult};

/// Normalize a relative path into an object key.
pub fn object_key(prefix: Option<&str>, relative: &str) -> StorageResult<String> {
    let relative = relative.replace('\\', "/");
    let relative = relative.trim_start_matches("./");
    if relative.starts_with('/') {
        return Err(StorageError::InvalidKey(format!(
            "key must be relative: {}",
            relative
        )));
    }
    if relative.split('/').any(|segment| segment == "..") {
        return Err(StorageError::InvalidKey(format!(
            "key must not contain '..': {}",
            relative
        )));
    }

    let relative = relative.trim_end_matches('/');
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) if relative.is_empty() => Ok(prefix.to_string()),
        Some(prefix) => Ok(format!("{}/{}", prefix, relative)),
        None => Ok(relative.to_string()),
    }
}

/// Key prefix used for recursive listing/deletion: always ends with `/`
/// unless empty.
pub fn directory_prefix(key: &str) -> String {
    let key = key.trim_end_matches('/');
    if key.is_empty() {
        String::new()
    } else {
        format!("{}/", key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_joins_prefix() {
        assert_eq!(
            object_key(Some("/secondary/"), "template/tmpl/2/201/a.qcow2").unwrap(),
            "secondary/template/tmpl/2/201/a.qcow2"
        );
        assert_eq!(object_key(None, "./volumes/2/9/").unwrap(), "volumes/2/9");
    }

    #[test]
    fn test_object_key_rejects_traversal() {
        assert!(object_key(None, "../etc/passwd").is_err());
        assert!(object_key(None, "/abs/path").is_err());
    }

    #[test]
    fn test_directory_prefix() {
        assert_eq!(directory_prefix("snapshots/2/9"), "snapshots/2/9/");
        assert_eq!(directory_prefix(""), "");
    }
}
