//! AES-256 credential vault with a machine-derived key.

use aes::Aes256;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use outreach_core::error::{OutreachError, Result};
use outreach_core::traits::CredentialStore;
use sha2::{Digest, Sha256};

const BLOCK_SIZE: usize = 16;

/// Encrypts and decrypts per-identity credential blobs.
pub struct CredentialVault {
    key: [u8; 32],
}

impl CredentialVault {
    /// Vault keyed to this machine (hostname + username).
    pub fn new() -> Self {
        Self {
            key: derive_machine_key(),
        }
    }

    /// Vault with an explicit key; used by tests and migrations.
    pub fn with_key(key: [u8; 32]) -> Self {
        Self { key }
    }
}

impl Default for CredentialVault {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for CredentialVault {
    fn encrypt(&self, secret: &str) -> Result<String> {
        let encrypted = encrypt_aes256(secret.as_bytes(), &self.key);
        Ok(BASE64.encode(&encrypted))
    }

    fn decrypt(&self, blob: &str) -> Result<String> {
        if blob.is_empty() {
            return Err(OutreachError::Config("credential blob is empty".into()));
        }
        let encrypted = BASE64
            .decode(blob.trim())
            .map_err(|e| OutreachError::Config(format!("credential base64 decode failed: {e}")))?;
        let decrypted = decrypt_aes256(&encrypted, &self.key);
        String::from_utf8(decrypted).map_err(|e| {
            OutreachError::Config(format!("credential decryption produced invalid UTF-8: {e}"))
        })
    }
}

/// Derive a machine-specific AES-256 key from hostname + username.
fn derive_machine_key() -> [u8; 32] {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "outreach".into());
    let username = whoami::username();
    let salt = format!("outreach::{username}@{hostname}::credentials");

    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    let result = hasher.finalize();

    let mut key = [0u8; 32];
    key.copy_from_slice(&result);
    key
}

/// AES-256-ECB encrypt with PKCS7 padding.
fn encrypt_aes256(data: &[u8], key: &[u8; 32]) -> Vec<u8> {
    let cipher = Aes256::new(GenericArray::from_slice(key));

    // PKCS7 padding
    let padding_len = BLOCK_SIZE - (data.len() % BLOCK_SIZE);
    let mut padded = data.to_vec();
    padded.extend(std::iter::repeat_n(padding_len as u8, padding_len));

    let mut encrypted = Vec::with_capacity(padded.len());
    for chunk in padded.chunks(BLOCK_SIZE) {
        let mut block = GenericArray::clone_from_slice(chunk);
        cipher.encrypt_block(&mut block);
        encrypted.extend_from_slice(&block);
    }

    encrypted
}

/// AES-256-ECB decrypt with PKCS7 unpadding.
fn decrypt_aes256(data: &[u8], key: &[u8; 32]) -> Vec<u8> {
    let cipher = Aes256::new(GenericArray::from_slice(key));

    let mut decrypted = Vec::with_capacity(data.len());
    for chunk in data.chunks(BLOCK_SIZE) {
        if chunk.len() == BLOCK_SIZE {
            let mut block = GenericArray::clone_from_slice(chunk);
            cipher.decrypt_block(&mut block);
            decrypted.extend_from_slice(&block);
        }
    }

    // Remove PKCS7 padding
    if let Some(&pad_len) = decrypted.last() {
        let pad_len = pad_len as usize;
        if pad_len <= BLOCK_SIZE && pad_len <= decrypted.len() {
            let valid = decrypted[decrypted.len() - pad_len..]
                .iter()
                .all(|&b| b == pad_len as u8);
            if valid {
                decrypted.truncate(decrypted.len() - pad_len);
            }
        }
    }

    decrypted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let vault = CredentialVault::with_key([7u8; 32]);
        let blob = vault.encrypt("app-password-12345").unwrap();
        assert_ne!(blob, "app-password-12345");
        assert_eq!(vault.decrypt(&blob).unwrap(), "app-password-12345");
    }

    #[test]
    fn test_empty_blob_is_config_error() {
        let vault = CredentialVault::with_key([7u8; 32]);
        let err = vault.decrypt("").unwrap_err();
        assert!(matches!(err, OutreachError::Config(_)));
    }

    #[test]
    fn test_garbage_blob_is_config_error() {
        let vault = CredentialVault::with_key([7u8; 32]);
        let err = vault.decrypt("%%%not-base64%%%").unwrap_err();
        assert!(matches!(err, OutreachError::Config(_)));
    }

    #[test]
    fn test_wrong_key_does_not_round_trip() {
        let vault = CredentialVault::with_key([7u8; 32]);
        let other = CredentialVault::with_key([9u8; 32]);
        let blob = vault.encrypt("secret").unwrap();
        // Either invalid UTF-8 (error) or valid-but-different bytes.
        match other.decrypt(&blob) {
            Ok(s) => assert_ne!(s, "secret"),
            Err(e) => assert!(matches!(e, OutreachError::Config(_))),
        }
    }
}
