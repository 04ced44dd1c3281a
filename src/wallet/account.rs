use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::storage::encrypted::{EncryptedKey, SecureKey};
use crate::utils::{base64_encode, ecdsa_p256_sha256_sign, new_key_pair, public_key_info};
use std::path::Path;

/// An ECDSA P-256 identity. The address is the base64 SubjectPublicKeyInfo.
#[derive(Clone)]
pub struct Account {
    pkcs8: SecureKey,
    address: String,
}

impl Account {
    pub fn new() -> Result<Account> {
        Self::from_pkcs8(new_key_pair()?)
    }

    pub fn from_pkcs8(pkcs8: Vec<u8>) -> Result<Account> {
        let address = base64_encode(&public_key_info(&pkcs8)?);
        Ok(Account {
            pkcs8: SecureKey::new(pkcs8),
            address,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Stamps `tx` with this account as sender and signs its canonical bytes
    pub fn sign(&self, tx: &mut Transaction) -> Result<()> {
        tx.sender = self.address.clone();
        let signature = ecdsa_p256_sha256_sign(self.pkcs8.as_bytes(), &tx.canonical_bytes())?;
        tx.signature = base64_encode(&signature);
        Ok(())
    }

    pub fn export_encrypted(&self, password: &str) -> Result<EncryptedKey> {
        EncryptedKey::seal(&self.address, self.pkcs8.as_bytes(), password)
    }

    pub fn import_encrypted(key: &EncryptedKey, password: &str) -> Result<Account> {
        let account = Self::from_pkcs8(key.open(password)?)?;
        if account.address != key.address {
            return Err(BlockchainError::Crypto(
                "Decrypted key does not match the stored address".to_string(),
            ));
        }
        Ok(account)
    }

    pub fn save(&self, path: &Path, password: &str) -> Result<()> {
        self.export_encrypted(password)?.save(path)
    }

    pub fn load(path: &Path, password: &str) -> Result<Account> {
        Self::import_encrypted(&EncryptedKey::load(path)?, password)
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .finish()
    }
}
