//! Encryption of upload metadata shared with the orchestrator

use crate::AppError;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

/// AES-256-GCM over the pre-shared upload key.
///
/// Wire format is `base64(nonce[12] || ciphertext)`.
#[derive(Clone)]
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    /// Create a new encryption service from a raw 32-byte key.
    pub fn from_key_bytes(key_bytes: &[u8]) -> Result<Self, AppError> {
        if key_bytes.len() != 32 {
            return Err(AppError::Config(
                "Encryption key must be 32 bytes (256 bits)".to_string(),
            ));
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Derive the cipher key from arbitrary shared-key material (SHA-256).
    pub fn from_shared_key(material: &[u8]) -> Result<Self, AppError> {
        if material.is_empty() {
            return Err(AppError::Config("upload key is empty".to_string()));
        }
        let digest = Sha256::digest(material);
        Self::from_key_bytes(digest.as_slice())
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| AppError::Internal(format!("Encryption failed: {}", e)))?;

        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(&combined))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String, AppError> {
        let combined = general_purpose::STANDARD
            .decode(encrypted.trim())
            .map_err(|e| AppError::InvalidInput(format!("metadata is not valid base64: {}", e)))?;

        if combined.len() < 12 {
            return Err(AppError::InvalidInput("metadata too short".to_string()));
        }

        let nonce = Nonce::from_slice(&combined[..12]);
        let ciphertext = &combined[12..];

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| AppError::InvalidInput("metadata could not be decrypted".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| AppError::InvalidInput(format!("Invalid UTF-8 in metadata: {}", e)))
    }

    /// Encrypt a serializable value as JSON.
    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> Result<String, AppError> {
        let json = serde_json::to_string(value)
            .map_err(|e| AppError::Internal(format!("Failed to serialize metadata: {}", e)))?;
        self.encrypt(&json)
    }

    /// Decrypt and deserialize a JSON value.
    pub fn decrypt_json<T: DeserializeOwned>(&self, encrypted: &str) -> Result<T, AppError> {
        let json = self.decrypt(encrypted)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        size: u64,
    }

    #[test]
    fn test_rejects_short_key() {
        assert!(EncryptionService::from_key_bytes(b"short").is_err());
        assert!(EncryptionService::from_shared_key(b"").is_err());
    }

    #[test]
    fn test_json_survives_encryption() {
        let service = EncryptionService::from_shared_key(b"shared-secret").unwrap();
        let value = Sample {
            name: "centos".to_string(),
            size: 42,
        };
        let encrypted = service.encrypt_json(&value).unwrap();
        assert_ne!(encrypted, serde_json::to_string(&value).unwrap());
        let decrypted: Sample = service.decrypt_json(&encrypted).unwrap();
        assert_eq!(decrypted, value);
    }

    #[test]
    fn test_wrong_key_is_invalid_input() {
        let a = EncryptionService::from_shared_key(b"key-a").unwrap();
        let b = EncryptionService::from_shared_key(b"key-b").unwrap();
        let encrypted = a.encrypt("payload").unwrap();
        match b.decrypt(&encrypted) {
            Err(AppError::InvalidInput(msg)) => assert!(msg.contains("decrypted")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
