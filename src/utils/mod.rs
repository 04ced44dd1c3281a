//! Utility functions and helpers
//!
//! Hashing, base64, ECDSA P-256 signing and the bincode helpers used for
//! storage values.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    base64_decode, base64_encode, current_timestamp, ecdsa_p256_sha256_sign,
    ecdsa_p256_sha256_verify, new_key_pair, public_key_info, sha256_digest,
};

pub use serialization::{deserialize, serialize};
