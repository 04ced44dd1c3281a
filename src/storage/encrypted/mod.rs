//! At-rest protection for account private keys
//!
//! Chain data is public and stored as is; only key files are encrypted.

pub mod cipher;
pub mod key_file;

pub use cipher::{Aes256GcmCipher, SecureKey};
pub use key_file::{EncryptedKey, MIN_PASSWORD_LENGTH};

/// Cryptographically secure random bytes
pub fn generate_random_bytes(length: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes_differ() {
        assert_ne!(generate_random_bytes(32), generate_random_bytes(32));
    }
}
