// This is the ledger engine - the only component that changes chain state.
// Blocks and pending transactions come in through post_block and
// post_transaction; both take the write side of one lock so they apply in a
// total order, while every read shares the read side and sees either the
// tip before a block or after it, never something in between.

use crate::core::monetary::{block_reward, MAX_PENDING_TRANSACTIONS};
use crate::core::state::{LedgerView, Mode};
use crate::core::{Balance, Block, PollTally, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::{BlockCommit, Repository, SledRepository};
use log::{debug, info};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone)]
pub struct Blockchain {
    // Hash of the current last block; also the single-writer lock
    tip_hash: Arc<RwLock<String>>,
    repository: Arc<dyn Repository>,
    difficulty: u32,
}

impl Blockchain {
    pub fn open(db_path: &Path, difficulty: u32) -> Result<Blockchain> {
        let repository = SledRepository::open(db_path)?;
        Self::new(Arc::new(repository), difficulty)
    }

    /// Loads the chain from `repository`, writing genesis first if it is empty
    pub fn new(repository: Arc<dyn Repository>, difficulty: u32) -> Result<Blockchain> {
        let genesis = Block::genesis();
        if repository.get_block(&genesis.hash)?.is_none() {
            info!("Creating genesis block {}", genesis.hash);
            repository.commit_block(&BlockCommit::genesis(genesis.clone()))?;
        }

        let mut tip = genesis;
        while let Some(next) = repository.get_next_block(&tip.hash)? {
            tip = next;
        }
        info!("Chain loaded, last block {}", tip.hash);

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip.hash)),
            repository,
            difficulty,
        })
    }

    fn read_lock(&self) -> Result<RwLockReadGuard<'_, String>> {
        self.tip_hash
            .read()
            .map_err(|_| BlockchainError::Database("Chain lock poisoned".to_string()))
    }

    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, String>> {
        self.tip_hash
            .write()
            .map_err(|_| BlockchainError::Database("Chain lock poisoned".to_string()))
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_tip_hash(&self) -> Result<String> {
        Ok(self.read_lock()?.clone())
    }

    pub fn get_genesis(&self) -> Result<Block> {
        Ok(Block::genesis())
    }

    pub fn get_last_block(&self) -> Result<Block> {
        let tip = self.read_lock()?;
        self.repository
            .get_block(&tip)?
            .ok_or_else(|| BlockchainError::Database(format!("Last block {} is missing", *tip)))
    }

    pub fn get_block(&self, hash: &str) -> Result<Block> {
        let _tip = self.read_lock()?;
        self.repository
            .get_block(hash)?
            .ok_or_else(|| BlockchainError::NotFound(format!("block {hash}")))
    }

    /// The block whose previous hash is `hash`
    pub fn get_next_block(&self, hash: &str) -> Result<Block> {
        let _tip = self.read_lock()?;
        self.repository
            .get_next_block(hash)?
            .ok_or_else(|| BlockchainError::NotFound(format!("block after {hash}")))
    }

    /// Genesis through the last block
    pub fn get_all_blocks(&self) -> Result<Vec<Block>> {
        let _tip = self.read_lock()?;
        BlockIterator::new(self.repository.as_ref()).collect()
    }

    /// Oldest first, at most 256
    pub fn get_pending_transactions(&self) -> Result<Vec<Transaction>> {
        let _tip = self.read_lock()?;
        self.repository
            .get_pending_transactions(MAX_PENDING_TRANSACTIONS)
    }

    /// Final balance; accounts never seen have an empty one
    pub fn get_balance(&self, owner: &str) -> Result<Balance> {
        let _tip = self.read_lock()?;
        Ok(self
            .repository
            .get_balance(owner)?
            .unwrap_or_else(|| Balance::new(owner)))
    }

    pub fn get_transaction(&self, signature: &str, include_pending: bool) -> Result<Transaction> {
        let _tip = self.read_lock()?;
        match self.repository.get_transaction(signature)? {
            Some(tx) if include_pending || !tx.pending => Ok(tx),
            _ => Err(BlockchainError::NotFound(format!("transaction {signature}"))),
        }
    }

    pub fn get_poll_tally(&self, poll: &str) -> Result<PollTally> {
        let _tip = self.read_lock()?;
        self.repository
            .get_poll_tally(poll)?
            .ok_or_else(|| BlockchainError::NotFound(format!("tally for poll {poll}")))
    }

    /// Validates `tx` against final state plus the sender's pending
    /// transactions and adds it to the pending pool
    pub fn post_transaction(&self, tx: &Transaction) -> Result<()> {
        if !tx.verify() {
            return Err(BlockchainError::InvalidTransaction(
                "signature does not verify".to_string(),
            ));
        }

        let _tip = self.write_lock()?;
        if self.repository.get_transaction(&tx.signature)?.is_some() {
            return Err(BlockchainError::DuplicateTransaction(tx.signature.clone()));
        }

        // Pool entries of the sender that no longer apply are dropped
        let mut view = LedgerView::new(self.repository.as_ref(), Mode::Pending);
        let mut unusable = Vec::new();
        for pending in self.repository.get_pending_by_sender(&tx.sender)? {
            if let Err(e) = view.apply(&pending) {
                info!("Dropping pending transaction {}: {e}", pending.signature);
                unusable.push(pending.signature);
            }
        }
        self.repository.remove_pending(&unusable)?;
        view.apply(tx)?;

        self.repository.insert_pending(tx)?;
        info!("Accepted pending {} transaction {}", tx.kind(), tx.signature);
        Ok(())
    }

    /// Appends `block` if it extends the current tip and every transaction
    /// in it applies. Either the whole block lands or nothing changes.
    pub fn post_block(&self, block: &Block) -> Result<()> {
        let mut tip = self.write_lock()?;

        if block.previous_hash.as_deref() != Some(tip.as_str()) {
            return Err(BlockchainError::InvalidBlock(format!(
                "previous hash {:?} is not the last block {}",
                block.previous_hash, *tip
            )));
        }
        if !block.is_valid(self.difficulty) {
            return Err(BlockchainError::InvalidBlock(format!(
                "hash {} does not match content or difficulty {}",
                block.hash, self.difficulty
            )));
        }

        let mut view = LedgerView::new(self.repository.as_ref(), Mode::Block);
        self.apply_block_transactions(&mut view, block)?;
        view.reward(&block.validator, block_reward(block.transactions.len()))?;

        let dropped_pending = self.stale_pending(&mut view, block)?;
        let (balances, tallies) = view.into_changes();
        self.repository.commit_block(&BlockCommit {
            block: block.clone(),
            balances,
            tallies,
            dropped_pending,
        })?;

        *tip = block.hash.clone();
        info!(
            "Accepted block {} with {} transactions from {}",
            block.hash,
            block.transactions.len(),
            block.validator
        );
        Ok(())
    }

    fn apply_block_transactions(&self, view: &mut LedgerView<'_>, block: &Block) -> Result<()> {
        for (index, tx) in block.transactions.iter().enumerate() {
            let invalid = |reason: String| {
                BlockchainError::InvalidBlock(format!("transaction {index}: {reason}"))
            };
            if !tx.verify() {
                return Err(invalid("signature does not verify".to_string()));
            }
            if let Some(existing) = self.repository.get_transaction(&tx.signature)? {
                if !existing.pending {
                    return Err(invalid("already in the chain".to_string()));
                }
            }
            view.apply(tx).map_err(|e| match e {
                BlockchainError::InvalidTransaction(reason) => invalid(reason),
                other => other,
            })?;
        }
        Ok(())
    }

    // Pending transactions whose nonce the block has overtaken can never be
    // included anymore
    fn stale_pending(&self, view: &mut LedgerView<'_>, block: &Block) -> Result<Vec<String>> {
        let included: HashSet<&str> = block
            .transactions
            .iter()
            .map(|tx| tx.signature.as_str())
            .collect();
        let senders: BTreeSet<&str> = block
            .transactions
            .iter()
            .map(|tx| tx.sender.as_str())
            .collect();

        let mut stale = Vec::new();
        for sender in senders {
            let nonce = view.balance(sender)?.nonce;
            for pending in self.repository.get_pending_by_sender(sender)? {
                if pending.nonce <= nonce && !included.contains(pending.signature.as_str()) {
                    debug!("Dropping stale pending transaction {}", pending.signature);
                    stale.push(pending.signature);
                }
            }
        }
        Ok(stale)
    }

    /// The longest prefix-consistent subset of `candidates` that would be
    /// accepted in a block on the current tip, in the given order
    pub fn filter_candidates(&self, candidates: &[Transaction]) -> Result<Vec<Transaction>> {
        let _tip = self.read_lock()?;
        let mut view = LedgerView::new(self.repository.as_ref(), Mode::Block);
        let mut accepted = Vec::new();
        for tx in candidates {
            if !tx.verify() {
                continue;
            }
            if let Some(existing) = self.repository.get_transaction(&tx.signature)? {
                if !existing.pending {
                    continue;
                }
            }
            match view.apply(tx) {
                Ok(()) => accepted.push(tx.clone()),
                Err(e) => debug!("Leaving {} out of the block: {e}", tx.signature),
            }
        }
        Ok(accepted)
    }
}

/// Walks the chain forward from genesis through the next-block links
pub struct BlockIterator<'a> {
    repository: &'a dyn Repository,
    next: Option<Block>,
    failed: bool,
}

impl<'a> BlockIterator<'a> {
    pub fn new(repository: &'a dyn Repository) -> BlockIterator<'a> {
        BlockIterator {
            repository,
            next: Some(Block::genesis()),
            failed: false,
        }
    }
}

impl Iterator for BlockIterator<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let current = self.next.take()?;
        match self.repository.get_next_block(&current.hash) {
            Ok(next) => self.next = next,
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        }
        Some(Ok(current))
    }
}
