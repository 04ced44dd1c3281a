//! Error handling for the ledger node
//!
//! Ledger errors are local results that the network layer turns into
//! `ok=false` responses; network errors reach the calling façade method.

use std::fmt;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

#[derive(Debug, Clone, PartialEq)]
pub enum BlockchainError {
    /// Signature, nonce, cost or referential failure of a transaction
    InvalidTransaction(String),
    /// Hash, proof-of-work, linkage or transaction-set failure of a block
    InvalidBlock(String),
    /// A transaction with the same signature is already known
    DuplicateTransaction(String),
    /// Block, transaction or peer lookup miss
    NotFound(String),
    /// No response within the protocol deadline
    Timeout(String),
    /// The operation was cancelled by the caller
    Cancelled,
    /// Malformed or unexpected wire message
    Protocol(String),
    /// The remote peer answered with `ok=false`
    Rejected(String),
    /// Key import, signing or decryption failure
    Crypto(String),
    /// A live session to this address already exists
    AlreadyConnected(String),
    /// Connect, send or receive failure on a channel
    Connection(String),
    /// Storage errors
    Database(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// File I/O errors
    Io(String),
    /// Configuration errors
    Config(String),
    /// Encryption/decryption errors
    Encryption(String),
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {msg}"),
            BlockchainError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            BlockchainError::DuplicateTransaction(sig) => {
                write!(f, "Duplicate transaction: {sig}")
            }
            BlockchainError::NotFound(msg) => write!(f, "Not found: {msg}"),
            BlockchainError::Timeout(msg) => write!(f, "Timeout: {msg}"),
            BlockchainError::Cancelled => write!(f, "Operation cancelled"),
            BlockchainError::Protocol(msg) => write!(f, "Protocol error: {msg}"),
            BlockchainError::Rejected(msg) => write!(f, "Rejected by peer: {msg}"),
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::AlreadyConnected(addr) => write!(f, "Already connected to {addr}"),
            BlockchainError::Connection(msg) => write!(f, "Connection error: {msg}"),
            BlockchainError::Database(msg) => write!(f, "Database error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            BlockchainError::Encryption(msg) => write!(f, "Encryption error: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for BlockchainError {
    fn from(err: serde_json::Error) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_message() {
        let err = BlockchainError::InvalidBlock("stale previous hash".to_string());
        assert_eq!(err.to_string(), "Invalid block: stale previous hash");

        let err = BlockchainError::AlreadyConnected("127.0.0.1:2001".to_string());
        assert_eq!(err.to_string(), "Already connected to 127.0.0.1:2001");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: BlockchainError = io.into();
        assert!(matches!(err, BlockchainError::Io(_)));
    }
}
