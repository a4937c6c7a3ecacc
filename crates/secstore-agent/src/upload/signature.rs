//! Signed upload requests.
//!
//! `x-signature` = base64(HMAC-SHA256(key, metadata || url || expires)), where
//! `url` is `https://` + `x-forwarded-host` + request path and query.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use secstore_core::AppError;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct UploadSigner {
    key: Vec<u8>,
}

impl UploadSigner {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        UploadSigner { key: key.into() }
    }

    pub fn sign(&self, metadata: &str, url: &str, expires: &str) -> Result<String, AppError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| AppError::Config(format!("invalid upload key: {}", e)))?;
        mac.update(metadata.as_bytes());
        mac.update(url.as_bytes());
        mac.update(expires.as_bytes());
        Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    pub fn verify(
        &self,
        signature: &str,
        metadata: &str,
        url: &str,
        expires: &str,
    ) -> Result<(), AppError> {
        let expected = self.sign(metadata, url, expires)?;
        if secure_compare(signature.trim(), &expected) {
            Ok(())
        } else {
            Err(AppError::SignatureMismatch)
        }
    }
}

/// The URL the client signed.
pub fn signed_url(forwarded_host: &str, path_and_query: &str) -> String {
    format!("https://{}{}", forwarded_host.trim(), path_and_query)
}

/// `x-expires` is either unix seconds or an RFC 3339 timestamp.
pub fn parse_expiry(value: &str) -> Result<DateTime<Utc>, AppError> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<i64>() {
        return Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| AppError::InvalidInput(format!("invalid x-expires value {}", value)));
    }
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| AppError::InvalidInput(format!("invalid x-expires value {}", value)))
}

pub fn check_not_expired(expires: &str, now: DateTime<Utc>) -> Result<(), AppError> {
    if parse_expiry(expires)? < now {
        return Err(AppError::Expired);
    }
    Ok(())
}

pub(crate) fn secure_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_signature_covers_every_input() {
        let signer = UploadSigner::new(b"secret".to_vec());
        let url = signed_url("ssvm.example", "/upload?uuid=abc");
        assert_eq!(url, "https://ssvm.example/upload?uuid=abc");

        let sig = signer.sign("meta", &url, "1700000000").unwrap();
        assert!(signer.verify(&sig, "meta", &url, "1700000000").is_ok());
        for (meta, u, exp) in [
            ("other", url.as_str(), "1700000000"),
            ("meta", "https://evil/upload?uuid=abc", "1700000000"),
            ("meta", url.as_str(), "1700000001"),
        ] {
            assert!(matches!(
                signer.verify(&sig, meta, u, exp),
                Err(AppError::SignatureMismatch)
            ));
        }
    }

    #[test]
    fn test_different_key_fails() {
        let sig = UploadSigner::new(b"a".to_vec()).sign("m", "u", "1").unwrap();
        assert!(UploadSigner::new(b"b".to_vec())
            .verify(&sig, "m", "u", "1")
            .is_err());
    }

    #[test]
    fn test_expiry_formats() {
        let now = Utc::now();
        let future = (now + Duration::minutes(5)).timestamp().to_string();
        let past = (now - Duration::minutes(5)).to_rfc3339();
        assert!(check_not_expired(&future, now).is_ok());
        assert!(matches!(
            check_not_expired(&past, now),
            Err(AppError::Expired)
        ));
        assert!(matches!(
            check_not_expired("tomorrow", now),
            Err(AppError::InvalidInput(_))
        ));
    }
}
