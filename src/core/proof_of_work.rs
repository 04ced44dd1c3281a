use crate::core::Block;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

/// Difficulty predicate and nonce search.
///
/// A hash meets difficulty `d` when its base64 rendering contains at least
/// `d` `'0'` characters anywhere in the string, not as a leading run.
pub struct ProofOfWork {
    difficulty: u32,
}

impl ProofOfWork {
    pub fn new(difficulty: u32) -> ProofOfWork {
        ProofOfWork { difficulty }
    }

    pub fn check(&self, hash: &str) -> bool {
        let zeros = hash.bytes().filter(|b| *b == b'0').count();
        zeros >= self.difficulty as usize
    }

    /// Recomputed hash must match the stored one and meet the difficulty
    pub fn validate(&self, block: &Block) -> bool {
        let hash = block.calculate_hash();
        hash == block.hash && self.check(&hash)
    }

    /// Searches upward from the block's current nonce. The current nonce is
    /// tried first, so an already satisfying block is left untouched.
    /// Returns false if cancelled or the nonce space runs out.
    pub fn run(&self, block: &mut Block, cancel: &CancellationToken) -> bool {
        block.difficulty = self.difficulty;
        block.hash = block.calculate_hash();
        if self.check(&block.hash) {
            return true;
        }

        info!(
            "Starting proof-of-work for block with {} transactions at difficulty {}",
            block.transactions.len(),
            self.difficulty
        );
        loop {
            if cancel.is_cancelled() {
                info!("Proof-of-work cancelled at nonce {}", block.nonce);
                return false;
            }
            block.nonce = match block.nonce.checked_add(1) {
                Some(nonce) => nonce,
                None => {
                    warn!("Nonce space exhausted without meeting difficulty");
                    return false;
                }
            };
            block.hash = block.calculate_hash();
            if self.check(&block.hash) {
                info!("Proof-of-work completed: {} (nonce {})", block.hash, block.nonce);
                return true;
            }
        }
    }
}
