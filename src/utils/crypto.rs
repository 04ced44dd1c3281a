use ring::digest::{Context, SHA256};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_ASN1,
    ECDSA_P256_SHA256_ASN1_SIGNING,
};

use crate::error::{BlockchainError, Result};
use data_encoding::BASE64;
use std::time::{SystemTime, UNIX_EPOCH};

/// DER header of a SubjectPublicKeyInfo for an uncompressed P-256 point
const P256_SPKI_PREFIX: [u8; 26] = [
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08,
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
];

const P256_POINT_LEN: usize = 65;

/// Unix time in seconds
pub fn current_timestamp() -> Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| BlockchainError::Crypto(format!("System time error: {e}")))?
        .as_secs();

    if duration > i64::MAX as u64 {
        return Err(BlockchainError::Crypto("Timestamp overflow".to_string()));
    }

    Ok(duration as i64)
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    digest.as_ref().to_vec()
}

pub fn base64_encode(data: &[u8]) -> String {
    BASE64.encode(data)
}

pub fn base64_decode(data: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(data.as_bytes())
        .map_err(|e| BlockchainError::Crypto(format!("Invalid base64 encoding: {e}")))
}

pub fn new_key_pair() -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
        .map_err(|e| BlockchainError::Crypto(format!("Failed to generate ECDSA key pair: {e}")))?
        .as_ref()
        .to_vec();
    Ok(pkcs8)
}

/// SubjectPublicKeyInfo (DER) for the key pair stored in `pkcs8`
pub fn public_key_info(pkcs8: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8, &rng)
        .map_err(|e| {
            BlockchainError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
        })?;
    let mut spki = P256_SPKI_PREFIX.to_vec();
    spki.extend_from_slice(key_pair.public_key().as_ref());
    Ok(spki)
}

pub fn ecdsa_p256_sha256_sign(pkcs8: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8, &rng)
        .map_err(|e| {
            BlockchainError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
        })?;
    let signature = key_pair
        .sign(&rng, message)
        .map_err(|e| BlockchainError::Crypto(format!("Failed to sign message: {e}")))?
        .as_ref()
        .to_vec();
    Ok(signature)
}

/// Verifies a DER signature against a SubjectPublicKeyInfo public key.
/// Anything that does not parse is a failed verification.
pub fn ecdsa_p256_sha256_verify(public_key_info: &[u8], signature: &[u8], message: &[u8]) -> bool {
    if public_key_info.len() != P256_SPKI_PREFIX.len() + P256_POINT_LEN
        || !public_key_info.starts_with(&P256_SPKI_PREFIX)
    {
        return false;
    }
    let point = &public_key_info[P256_SPKI_PREFIX.len()..];
    let peer_public_key = UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, point);
    peer_public_key.verify(message, signature).is_ok()
}
