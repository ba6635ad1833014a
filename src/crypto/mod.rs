/// Encryption at rest for third-party credentials
///
/// Registration and mailbox passwords are sealed with XChaCha20-Poly1305 under
/// the server key. Stored form is base64(nonce || ciphertext) with a random
/// 24-byte nonce per value.
use crate::error::{VaultError, VaultResult};
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

pub const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 24;

/// Symmetric cipher for stored credentials
#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; KEY_SIZE],
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

impl CredentialCipher {
    /// Build a cipher from raw key material, which must be exactly 32 bytes
    pub fn new(key: &[u8]) -> VaultResult<Self> {
        let key: [u8; KEY_SIZE] = key.try_into().map_err(|_| {
            VaultError::Internal(format!(
                "encryption key must be exactly {} bytes, got {}",
                KEY_SIZE,
                key.len()
            ))
        })?;
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &str) -> VaultResult<String> {
        let cipher = XChaCha20Poly1305::new((&self.key).into());

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Internal("credential encryption failed".to_string()))?;

        let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(output))
    }

    pub fn decrypt(&self, encoded: &str) -> VaultResult<String> {
        let data = STANDARD
            .decode(encoded)
            .map_err(|e| VaultError::Internal(format!("stored credential is not base64: {}", e)))?;

        if data.len() < NONCE_SIZE {
            return Err(VaultError::Internal(
                "stored credential is truncated".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let cipher = XChaCha20Poly1305::new((&self.key).into());
        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| VaultError::Internal("credential decryption failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| VaultError::Internal("decrypted credential is not UTF-8".to_string()))
    }
}

#[cfg(test)]
pub fn test_cipher() -> CredentialCipher {
    CredentialCipher::new(b"0123456789abcdef0123456789abcdef").unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sealed_value_opens_with_same_key() {
        let cipher = test_cipher();
        let sealed = cipher.encrypt("hunter22").unwrap();
        assert_ne!(sealed, "hunter22");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "hunter22");
    }

    #[test]
    fn test_nonce_is_fresh_per_value() {
        let cipher = test_cipher();
        assert_ne!(
            cipher.encrypt("same").unwrap(),
            cipher.encrypt("same").unwrap()
        );
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = test_cipher().encrypt("secret").unwrap();
        let other = CredentialCipher::new(&[7u8; 32]).unwrap();
        assert!(other.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_key_length_is_enforced() {
        assert!(CredentialCipher::new(b"short").is_err());
        assert!(CredentialCipher::new(&[0u8; 33]).is_err());
    }

    #[test]
    fn test_truncated_value_fails() {
        let cipher = test_cipher();
        assert!(cipher.decrypt(&STANDARD.encode([1u8; 10])).is_err());
        assert!(cipher.decrypt("not base64!").is_err());
    }
}
