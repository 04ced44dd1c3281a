use crate::core::{Balance, Block, PollTally, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::repository::{BlockCommit, Repository};
use crate::utils::{deserialize, serialize};
use sled::transaction::TransactionError;
use sled::{Db, Transactional, Tree};
use std::path::Path;

const BLOCKS_TREE: &str = "blocks";
// previous hash -> hash of the block built on it
const NEXT_BLOCKS_TREE: &str = "next_blocks";
const BALANCES_TREE: &str = "balances";
const TRANSACTIONS_TREE: &str = "transactions";
// big-endian insertion sequence -> signature
const PENDING_TREE: &str = "pending";
const TALLIES_TREE: &str = "poll_tallies";

#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
struct StoredTransaction {
    transaction: Transaction,
    seq: u64,
}

/// `Repository` backed by an embedded sled database
pub struct SledRepository {
    db: Db,
    blocks: Tree,
    next_blocks: Tree,
    balances: Tree,
    transactions: Tree,
    pending: Tree,
    tallies: Tree,
}

impl SledRepository {
    pub fn open(path: &Path) -> Result<SledRepository> {
        let db = sled::open(path).map_err(|e| {
            BlockchainError::Database(format!("Failed to open database at {}: {e}", path.display()))
        })?;
        Self::from_db(db)
    }

    /// In-memory database, removed on drop
    pub fn temporary() -> Result<SledRepository> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<SledRepository> {
        let open = |name: &str| {
            db.open_tree(name).map_err(|e| {
                BlockchainError::Database(format!("Failed to open {name} tree: {e}"))
            })
        };
        Ok(SledRepository {
            blocks: open(BLOCKS_TREE)?,
            next_blocks: open(NEXT_BLOCKS_TREE)?,
            balances: open(BALANCES_TREE)?,
            transactions: open(TRANSACTIONS_TREE)?,
            pending: open(PENDING_TREE)?,
            tallies: open(TALLIES_TREE)?,
            db,
        })
    }

    fn get_stored(&self, signature: &str) -> Result<Option<StoredTransaction>> {
        match self.transactions.get(signature)? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn pending_signatures(&self) -> impl Iterator<Item = Result<String>> + '_ {
        self.pending.iter().map(|item| {
            let (_, value) = item?;
            String::from_utf8(value.to_vec())
                .map_err(|e| BlockchainError::Database(format!("Invalid pending entry: {e}")))
        })
    }
}

impl Repository for SledRepository {
    fn get_block(&self, hash: &str) -> Result<Option<Block>> {
        match self.blocks.get(hash)? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_next_block(&self, previous_hash: &str) -> Result<Option<Block>> {
        match self.next_blocks.get(previous_hash)? {
            Some(hash) => {
                let hash = String::from_utf8(hash.to_vec())
                    .map_err(|e| BlockchainError::Database(format!("Invalid block link: {e}")))?;
                self.get_block(&hash)
            }
            None => Ok(None),
        }
    }

    fn get_balance(&self, owner: &str) -> Result<Option<Balance>> {
        match self.balances.get(owner)? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_transaction(&self, signature: &str) -> Result<Option<Transaction>> {
        Ok(self.get_stored(signature)?.map(|stored| stored.transaction))
    }

    fn get_pending_transactions(&self, limit: usize) -> Result<Vec<Transaction>> {
        let mut transactions = Vec::new();
        for signature in self.pending_signatures().take(limit) {
            if let Some(tx) = self.get_transaction(&signature?)? {
                transactions.push(tx);
            }
        }
        Ok(transactions)
    }

    fn get_pending_by_sender(&self, sender: &str) -> Result<Vec<Transaction>> {
        let mut transactions = Vec::new();
        for signature in self.pending_signatures() {
            if let Some(tx) = self.get_transaction(&signature?)? {
                if tx.sender == sender {
                    transactions.push(tx);
                }
            }
        }
        Ok(transactions)
    }

    fn get_poll_tally(&self, poll: &str) -> Result<Option<PollTally>> {
        match self.tallies.get(poll)? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn insert_pending(&self, tx: &Transaction) -> Result<()> {
        let seq = self.db.generate_id()?;
        let mut transaction = tx.clone();
        transaction.pending = true;
        let stored = serialize(&StoredTransaction { transaction, seq })?;

        (&self.transactions, &self.pending)
            .transaction(|(transactions, pending)| {
                transactions.insert(tx.signature.as_bytes(), stored.as_slice())?;
                pending.insert(seq.to_be_bytes().to_vec(), tx.signature.as_bytes())?;
                Ok(())
            })
            .map_err(|e: TransactionError| {
                BlockchainError::Database(format!("Failed to store pending transaction: {e}"))
            })?;
        Ok(())
    }

    fn remove_pending(&self, signatures: &[String]) -> Result<()> {
        let mut removed = Vec::new();
        for signature in signatures {
            if let Some(stored) = self.get_stored(signature)? {
                if stored.transaction.pending {
                    removed.push((signature.as_str(), stored.seq));
                }
            }
        }
        if removed.is_empty() {
            return Ok(());
        }

        (&self.transactions, &self.pending)
            .transaction(|(transactions, pending)| {
                for (signature, seq) in &removed {
                    transactions.remove(signature.as_bytes())?;
                    pending.remove(seq.to_be_bytes().to_vec())?;
                }
                Ok(())
            })
            .map_err(|e: TransactionError| {
                BlockchainError::Database(format!("Failed to remove pending transactions: {e}"))
            })?;
        Ok(())
    }

    fn commit_block(&self, commit: &BlockCommit) -> Result<()> {
        let block = &commit.block;
        let block_bytes = serialize(block)?;

        // Everything is encoded up front so the sled transaction can only
        // fail on storage errors.
        let mut finals = Vec::with_capacity(block.transactions.len());
        let mut cleared_seqs = Vec::new();
        for tx in &block.transactions {
            let previous = self.get_stored(&tx.signature)?;
            let seq = match previous {
                Some(stored) if stored.transaction.pending => {
                    cleared_seqs.push(stored.seq);
                    stored.seq
                }
                Some(stored) => stored.seq,
                None => 0,
            };
            let mut transaction = tx.clone();
            transaction.pending = false;
            finals.push((tx.signature.clone(), serialize(&StoredTransaction { transaction, seq })?));
        }

        let mut dropped = Vec::new();
        for signature in &commit.dropped_pending {
            if let Some(stored) = self.get_stored(signature)? {
                if stored.transaction.pending {
                    dropped.push((signature.clone(), stored.seq));
                }
            }
        }

        let balances = commit
            .balances
            .iter()
            .map(|balance| Ok((balance.owner.clone(), serialize(balance)?)))
            .collect::<Result<Vec<_>>>()?;
        let tallies = commit
            .tallies
            .iter()
            .map(|tally| Ok((tally.poll.clone(), serialize(tally)?)))
            .collect::<Result<Vec<_>>>()?;

        (
            &self.blocks,
            &self.next_blocks,
            &self.transactions,
            &self.pending,
            &self.balances,
            &self.tallies,
        )
            .transaction(
                |(blocks, next_blocks, transactions, pending, balances_tree, tallies_tree)| {
                    blocks.insert(block.hash.as_bytes(), block_bytes.as_slice())?;
                    if let Some(previous) = &block.previous_hash {
                        next_blocks.insert(previous.as_bytes(), block.hash.as_bytes())?;
                    }
                    for (signature, bytes) in &finals {
                        transactions.insert(signature.as_bytes(), bytes.as_slice())?;
                    }
                    for seq in &cleared_seqs {
                        pending.remove(seq.to_be_bytes().to_vec())?;
                    }
                    for (signature, seq) in &dropped {
                        transactions.remove(signature.as_bytes())?;
                        pending.remove(seq.to_be_bytes().to_vec())?;
                    }
                    for (owner, bytes) in &balances {
                        balances_tree.insert(owner.as_bytes(), bytes.as_slice())?;
                    }
                    for (poll, bytes) in &tallies {
                        tallies_tree.insert(poll.as_bytes(), bytes.as_slice())?;
                    }
                    Ok(())
                },
            )
            .map_err(|e: TransactionError| {
                BlockchainError::Database(format!("Failed to commit block {}: {e}", block.hash))
            })?;

        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Account;

    fn signed_ticket(account: &Account, nonce: i64) -> Transaction {
        let mut tx = Transaction::new_ticket(nonce, 0, "owner", "poll");
        account.sign(&mut tx).unwrap();
        tx
    }

    #[test]
    fn test_pending_keeps_insertion_order() {
        let repo = SledRepository::temporary().unwrap();
        let account = Account::new().unwrap();
        let txs: Vec<_> = (1..=5).map(|n| signed_ticket(&account, n)).collect();
        for tx in &txs {
            repo.insert_pending(tx).unwrap();
        }

        let pending = repo.get_pending_transactions(3).unwrap();
        let nonces: Vec<_> = pending.iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![1, 2, 3]);
        assert!(pending.iter().all(|tx| tx.pending));

        let by_sender = repo.get_pending_by_sender(account.address()).unwrap();
        assert_eq!(by_sender.len(), 5);
        assert!(repo.get_pending_by_sender("nobody").unwrap().is_empty());
    }

    #[test]
    fn test_pending_read_stops_at_the_limit() {
        let repo = SledRepository::temporary().unwrap();
        let account = Account::new().unwrap();
        for nonce in 1..=300 {
            repo.insert_pending(&signed_ticket(&account, nonce)).unwrap();
        }

        let pending = repo.get_pending_transactions(256).unwrap();
        let nonces: Vec<_> = pending.iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, (1..=256).collect::<Vec<_>>());
    }

    #[test]
    fn test_remove_pending_leaves_final_transactions() {
        let repo = SledRepository::temporary().unwrap();
        let genesis = Block::genesis();
        repo.commit_block(&BlockCommit::genesis(genesis.clone())).unwrap();

        let account = Account::new().unwrap();
        let final_tx = signed_ticket(&account, 1);
        let kept = signed_ticket(&account, 2);
        let removed = signed_ticket(&account, 3);
        let block = Block::new(Some(genesis.hash), vec![final_tx.clone()], "v", 0).unwrap();
        repo.commit_block(&BlockCommit {
            block,
            balances: vec![],
            tallies: vec![],
            dropped_pending: vec![],
        })
        .unwrap();
        repo.insert_pending(&kept).unwrap();
        repo.insert_pending(&removed).unwrap();

        repo.remove_pending(&[
            removed.signature.clone(),
            final_tx.signature.clone(),
            "unknown".to_string(),
        ])
        .unwrap();

        assert!(repo.get_transaction(&removed.signature).unwrap().is_none());
        assert!(!repo.get_transaction(&final_tx.signature).unwrap().unwrap().pending);
        let pending = repo.get_pending_transactions(256).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].signature, kept.signature);
    }

    #[test]
    fn test_commit_finalizes_pending_and_links_blocks() {
        let repo = SledRepository::temporary().unwrap();
        let genesis = Block::genesis();
        repo.commit_block(&BlockCommit::genesis(genesis.clone())).unwrap();

        let account = Account::new().unwrap();
        let included = signed_ticket(&account, 1);
        let stale = signed_ticket(&account, 2);
        repo.insert_pending(&included).unwrap();
        repo.insert_pending(&stale).unwrap();

        let block =
            Block::new(Some(genesis.hash.clone()), vec![included.clone()], "v", 0).unwrap();
        let mut balance = Balance::new("v");
        balance.coins = 10;
        repo.commit_block(&BlockCommit {
            block: block.clone(),
            balances: vec![balance.clone()],
            tallies: vec![],
            dropped_pending: vec![stale.signature.clone()],
        })
        .unwrap();

        assert_eq!(repo.get_next_block(&genesis.hash).unwrap(), Some(block.clone()));
        assert_eq!(repo.get_next_block(&block.hash).unwrap(), None);
        assert_eq!(repo.get_balance("v").unwrap(), Some(balance));

        let stored = repo.get_transaction(&included.signature).unwrap().unwrap();
        assert!(!stored.pending);
        assert!(repo.get_transaction(&stale.signature).unwrap().is_none());
        assert!(repo.get_pending_transactions(256).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::TempDir::new().unwrap();
        let genesis = Block::genesis();
        {
            let repo = SledRepository::open(dir.path()).unwrap();
            repo.commit_block(&BlockCommit::genesis(genesis.clone())).unwrap();
        }
        let repo = SledRepository::open(dir.path()).unwrap();
        assert_eq!(repo.get_block(&genesis.hash).unwrap(), Some(genesis));
    }
}
