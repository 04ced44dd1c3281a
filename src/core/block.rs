use crate::core::{ProofOfWork, Transaction};
use crate::error::Result;
use crate::utils::{base64_decode, base64_encode, current_timestamp, sha256_digest};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub const BLOCK_VERSION: u32 = 1;
pub const GENESIS_VALIDATOR: &str = "=";

static GENESIS: Lazy<Block> = Lazy::new(|| {
    let mut block = Block {
        version: BLOCK_VERSION,
        timestamp: 0,
        transactions: vec![],
        validator: GENESIS_VALIDATOR.to_string(),
        nonce: 0,
        difficulty: 0,
        hash: String::new(),
        previous_hash: None,
    };
    block.hash = block.calculate_hash();
    block
});

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub version: u32,
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    /// Address credited with the block reward
    pub validator: String,
    pub nonce: i64,
    pub difficulty: u32,
    pub hash: String,
    /// `None` only for genesis
    pub previous_hash: Option<String>,
}

impl Block {
    /// Builds an unmined block stamped with the current time
    pub fn new(
        previous_hash: Option<String>,
        transactions: Vec<Transaction>,
        validator: &str,
        difficulty: u32,
    ) -> Result<Block> {
        let transactions = transactions
            .into_iter()
            .map(|mut tx| {
                tx.pending = false;
                tx
            })
            .collect();
        let mut block = Block {
            version: BLOCK_VERSION,
            timestamp: current_timestamp()?,
            transactions,
            validator: validator.to_string(),
            nonce: 0,
            difficulty,
            hash: String::new(),
            previous_hash,
        };
        block.hash = block.calculate_hash();
        Ok(block)
    }

    /// The fixed first block every node starts from
    pub fn genesis() -> Block {
        GENESIS.clone()
    }

    pub fn is_genesis(&self) -> bool {
        self.previous_hash.is_none() && self.hash == GENESIS.hash
    }

    /// SHA-256 over timestamp, previous hash, every transaction's canonical
    /// bytes and the nonce, rendered as base64
    pub fn calculate_hash(&self) -> String {
        let mut data = Vec::new();
        data.extend(self.timestamp.to_le_bytes());
        if let Some(previous) = &self.previous_hash {
            // Hashes are base64; anything else is hashed verbatim
            match base64_decode(previous) {
                Ok(bytes) => data.extend(bytes),
                Err(_) => data.extend(previous.as_bytes()),
            }
        }
        for tx in &self.transactions {
            data.extend(tx.canonical_bytes());
        }
        data.extend(self.nonce.to_le_bytes());
        base64_encode(&sha256_digest(&data))
    }

    pub fn check_difficulty(hash: &str, difficulty: u32) -> bool {
        ProofOfWork::new(difficulty).check(hash)
    }

    pub fn try_mine(&mut self, difficulty: u32, cancel: &CancellationToken) -> bool {
        ProofOfWork::new(difficulty).run(self, cancel)
    }

    pub fn is_valid(&self, difficulty: u32) -> bool {
        ProofOfWork::new(difficulty).validate(self)
    }
}
