use crate::error::{BlockchainError, Result};
use crate::storage::encrypted::cipher::{Aes256GcmCipher, SecureKey, KEY_LEN};
use crate::utils::{base64_decode, base64_encode, current_timestamp};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

pub const MIN_PASSWORD_LENGTH: usize = 8;
const SALT_LEN: usize = 32;

/// Password-protected private key, stored as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedKey {
    /// Address of the key, readable without the password
    pub address: String,
    pub ciphertext: String,
    pub nonce: String,
    pub salt: String,
    pub created_at: i64,
}

impl EncryptedKey {
    pub fn seal(address: &str, secret: &[u8], password: &str) -> Result<EncryptedKey> {
        validate_password(password)?;
        let salt = super::generate_random_bytes(SALT_LEN);
        let key = derive_key(password, &salt)?;
        let (ciphertext, nonce) = Aes256GcmCipher::new(&key)?.encrypt(secret)?;

        Ok(EncryptedKey {
            address: address.to_string(),
            ciphertext: base64_encode(&ciphertext),
            nonce: base64_encode(&nonce),
            salt: base64_encode(&salt),
            created_at: current_timestamp()?,
        })
    }

    pub fn open(&self, password: &str) -> Result<Vec<u8>> {
        let salt = base64_decode(&self.salt)?;
        let nonce = base64_decode(&self.nonce)?;
        let ciphertext = base64_decode(&self.ciphertext)?;
        let key = derive_key(password, &salt)?;
        Aes256GcmCipher::new(&key)?.decrypt(&ciphertext, &nonce)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        log::info!("Saved encrypted key for {} to {}", self.address, path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<EncryptedKey> {
        let file = File::open(path)?;
        let key = serde_json::from_reader(BufReader::new(file))?;
        Ok(key)
    }
}

fn validate_password(password: &str) -> Result<()> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(BlockchainError::Encryption(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters long"
        )));
    }
    Ok(())
}

/// Argon2id, 64 MiB, 3 passes
fn derive_key(password: &str, salt: &[u8]) -> Result<SecureKey> {
    let params = Params::new(65536, 3, 1, Some(KEY_LEN))
        .map_err(|e| BlockchainError::Encryption(format!("Invalid Argon2 parameters: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = vec![0u8; KEY_LEN];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| BlockchainError::Encryption(format!("Key derivation failed: {e}")))?;
    Ok(SecureKey::new(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_seal_and_open() {
        let sealed = EncryptedKey::seal("addr", b"private key", "correct horse").unwrap();
        assert_eq!(sealed.open("correct horse").unwrap(), b"private key");
    }

    #[test]
    fn test_wrong_password_fails() {
        let sealed = EncryptedKey::seal("addr", b"private key", "correct horse").unwrap();
        let err = sealed.open("battery staple").unwrap_err();
        assert!(matches!(err, BlockchainError::Crypto(_)));
    }

    #[test]
    fn test_short_password_rejected() {
        let err = EncryptedKey::seal("addr", b"private key", "short").unwrap_err();
        assert!(matches!(err, BlockchainError::Encryption(_)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("key.json");
        let sealed = EncryptedKey::seal("addr", b"private key", "correct horse").unwrap();

        sealed.save(&path).unwrap();
        let loaded = EncryptedKey::load(&path).unwrap();
        assert_eq!(loaded, sealed);
        assert_eq!(loaded.open("correct horse").unwrap(), b"private key");
    }
}
