//! bincode helpers for values kept in sled trees
use crate::error::{BlockchainError, Result};

pub fn serialize<T: bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    bincode::encode_to_vec(data, bincode::config::standard())
        .map_err(|e| BlockchainError::Serialization(format!("Encoding failed: {e}")))
}

pub fn deserialize<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T> {
    let (data, read) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| BlockchainError::Serialization(format!("Decoding failed: {e}")))?;
    if read != bytes.len() {
        return Err(BlockchainError::Serialization(format!(
            "Trailing bytes after value: {} of {} consumed",
            read,
            bytes.len()
        )));
    }
    Ok(data)
}
