use crate::error::{BlockchainError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use zeroize::ZeroizeOnDrop;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// Key material that is wiped on drop
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecureKey {
    key: Vec<u8>,
}

impl SecureKey {
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

impl std::fmt::Debug for SecureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureKey")
            .field("length", &self.key.len())
            .finish()
    }
}

/// AES-256-GCM over a password-derived key
pub struct Aes256GcmCipher {
    cipher: Aes256Gcm,
}

impl Aes256GcmCipher {
    pub fn new(key: &SecureKey) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(BlockchainError::Encryption(format!(
                "AES-256-GCM requires a {KEY_LEN}-byte key"
            )));
        }
        let aes_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
        Ok(Self {
            cipher: Aes256Gcm::new(aes_key),
        })
    }

    /// Encrypts under a fresh random nonce; returns `(ciphertext, nonce)`
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let nonce_bytes = super::generate_random_bytes(NONCE_LEN);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self.cipher.encrypt(nonce, plaintext).map_err(|e| {
            BlockchainError::Encryption(format!("AES-256-GCM encryption failed: {e}"))
        })?;
        Ok((ciphertext, nonce_bytes))
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce_bytes: &[u8]) -> Result<Vec<u8>> {
        if nonce_bytes.len() != NONCE_LEN {
            return Err(BlockchainError::Encryption(format!(
                "AES-256-GCM requires a {NONCE_LEN}-byte nonce"
            )));
        }
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher.decrypt(nonce, ciphertext).map_err(|_| {
            BlockchainError::Crypto("Decryption failed: wrong password or corrupted key".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_short_key() {
        assert!(Aes256GcmCipher::new(&SecureKey::new(vec![0u8; 16])).is_err());
    }

    #[test]
    fn test_encrypt_then_decrypt() {
        let cipher = Aes256GcmCipher::new(&SecureKey::new(vec![1u8; KEY_LEN])).unwrap();
        let (ciphertext, nonce) = cipher.encrypt(b"pkcs8 document").unwrap();
        assert_eq!(nonce.len(), NONCE_LEN);
        assert_eq!(cipher.decrypt(&ciphertext, &nonce).unwrap(), b"pkcs8 document");
    }

    #[test]
    fn test_other_key_cannot_decrypt() {
        let first = Aes256GcmCipher::new(&SecureKey::new(vec![1u8; KEY_LEN])).unwrap();
        let second = Aes256GcmCipher::new(&SecureKey::new(vec![2u8; KEY_LEN])).unwrap();
        let (ciphertext, nonce) = first.encrypt(b"secret").unwrap();

        let err = second.decrypt(&ciphertext, &nonce).unwrap_err();
        assert!(matches!(err, BlockchainError::Crypto(_)));
    }

    #[test]
    fn test_debug_hides_key_bytes() {
        let key = SecureKey::new(vec![7u8; KEY_LEN]);
        assert_eq!(format!("{key:?}"), "SecureKey { length: 32 }");
    }
}
