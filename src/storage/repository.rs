use crate::core::{Balance, Block, PollTally, Transaction};
use crate::error::Result;

/// Everything a single accepted block changes, written in one atomic step
#[derive(Debug, Clone)]
pub struct BlockCommit {
    pub block: Block,
    /// Authoritative balances after applying the block
    pub balances: Vec<Balance>,
    pub tallies: Vec<PollTally>,
    /// Pending transactions made unusable by this block
    pub dropped_pending: Vec<String>,
}

impl BlockCommit {
    pub fn genesis(block: Block) -> BlockCommit {
        BlockCommit {
            block,
            balances: vec![],
            tallies: vec![],
            dropped_pending: vec![],
        }
    }
}

/// Storage the ledger engine runs on.
///
/// Implementations must make `commit_block` all-or-nothing and keep pending
/// transactions in insertion order.
pub trait Repository: Send + Sync {
    fn get_block(&self, hash: &str) -> Result<Option<Block>>;

    /// The block whose previous hash is `previous_hash`
    fn get_next_block(&self, previous_hash: &str) -> Result<Option<Block>>;

    fn get_balance(&self, owner: &str) -> Result<Option<Balance>>;

    /// Pending or final; the `pending` flag tells which
    fn get_transaction(&self, signature: &str) -> Result<Option<Transaction>>;

    /// Oldest first, at most `limit`
    fn get_pending_transactions(&self, limit: usize) -> Result<Vec<Transaction>>;

    /// Oldest first
    fn get_pending_by_sender(&self, sender: &str) -> Result<Vec<Transaction>>;

    fn get_poll_tally(&self, poll: &str) -> Result<Option<PollTally>>;

    fn insert_pending(&self, tx: &Transaction) -> Result<()>;

    /// Forgets pending transactions; final or unknown signatures are skipped
    fn remove_pending(&self, signatures: &[String]) -> Result<()>;

    fn commit_block(&self, commit: &BlockCommit) -> Result<()>;
}
