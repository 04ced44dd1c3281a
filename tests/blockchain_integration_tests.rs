//! Ledger integration tests
//!
//! Runs the ledger engine against an on-disk sled database the way a node
//! does: mine blocks, move a poll through tickets and votes, reopen.

use pollchain::core::{Block, Blockchain, PollOption, Transaction};
use pollchain::wallet::Account;
use pollchain::BlockchainError;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

const DIFFICULTY: u32 = 1;

fn mine(chain: &Blockchain, transactions: Vec<Transaction>, validator: &str) -> Block {
    let tip = chain.get_tip_hash().unwrap();
    let mut block = Block::new(Some(tip), transactions, validator, DIFFICULTY).unwrap();
    assert!(block.try_mine(DIFFICULTY, &CancellationToken::new()));
    chain.post_block(&block).unwrap();
    block
}

fn color_poll(account: &Account, nonce: i64) -> Transaction {
    let mut tx = Transaction::new_poll(
        nonce,
        1_700_000_000,
        "Favourite color",
        "One answer only",
        vec![
            PollOption {
                index: 0,
                title: "Red".to_string(),
                description: String::new(),
            },
            PollOption {
                index: 1,
                title: "Green".to_string(),
                description: String::new(),
            },
        ],
    );
    account.sign(&mut tx).unwrap();
    tx
}

#[test]
fn test_genesis_is_identical_across_nodes() {
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();
    let a = Blockchain::open(first.path(), DIFFICULTY).unwrap();
    let b = Blockchain::open(second.path(), DIFFICULTY).unwrap();

    assert_eq!(a.get_genesis().unwrap(), b.get_genesis().unwrap());
    assert_eq!(a.get_tip_hash().unwrap(), b.get_tip_hash().unwrap());
    assert_eq!(a.get_all_blocks().unwrap().len(), 1);
}

#[test]
fn test_poll_ticket_vote_through_pending_pool() {
    let dir = tempdir().unwrap();
    let chain = Blockchain::open(dir.path(), DIFFICULTY).unwrap();
    let alice = Account::new().unwrap();
    let bob = Account::new().unwrap();

    mine(&chain, vec![], alice.address());
    assert_eq!(chain.get_balance(alice.address()).unwrap().coins, 10);

    let poll = color_poll(&alice, 1);
    chain.post_transaction(&poll).unwrap();
    let mut ticket = Transaction::new_ticket(2, 1_700_000_001, bob.address(), &poll.signature);
    alice.sign(&mut ticket).unwrap();
    // The pending poll already spent all of alice's coins
    let err = chain.post_transaction(&ticket).unwrap_err();
    assert!(matches!(err, BlockchainError::InvalidTransaction(_)));

    let block = mine(&chain, chain.get_pending_transactions().unwrap(), alice.address());
    assert_eq!(block.transactions.len(), 1);
    assert_eq!(chain.get_balance(alice.address()).unwrap().coins, 10);
    assert!(!chain.get_transaction(&poll.signature, false).unwrap().pending);

    chain.post_transaction(&ticket).unwrap();
    mine(&chain, chain.get_pending_transactions().unwrap(), alice.address());
    let bob_balance = chain.get_balance(bob.address()).unwrap();
    assert_eq!(bob_balance.unused_tickets.len(), 1);

    let mut vote = Transaction::new_vote(1, 1_700_000_002, &poll.signature, 1);
    bob.sign(&mut vote).unwrap();
    chain.post_transaction(&vote).unwrap();
    mine(&chain, chain.get_pending_transactions().unwrap(), alice.address());

    let tally = chain.get_poll_tally(&poll.signature).unwrap();
    assert_eq!(tally.votes(1), Some(1));
    assert_eq!(tally.votes(0), Some(0));
    let bob_balance = chain.get_balance(bob.address()).unwrap();
    assert!(bob_balance.unused_tickets.is_empty());
    assert_eq!(bob_balance.used_tickets.len(), 1);

    let mut again = Transaction::new_vote(2, 1_700_000_003, &poll.signature, 0);
    bob.sign(&mut again).unwrap();
    let err = chain.post_transaction(&again).unwrap_err();
    assert!(matches!(err, BlockchainError::InvalidTransaction(_)));

    // 4 rewards of 10, minus the poll and the ticket
    assert_eq!(chain.get_balance(alice.address()).unwrap().coins, 29);
}

#[test]
fn test_reopen_restores_tip_and_balances() {
    let dir = tempdir().unwrap();
    let alice = Account::new().unwrap();
    let tip = {
        let chain = Blockchain::open(dir.path(), DIFFICULTY).unwrap();
        mine(&chain, vec![], alice.address());
        mine(&chain, vec![], alice.address()).hash
    };

    let chain = Blockchain::open(dir.path(), DIFFICULTY).unwrap();
    assert_eq!(chain.get_tip_hash().unwrap(), tip);
    assert_eq!(chain.get_last_block().unwrap().hash, tip);
    assert_eq!(chain.get_balance(alice.address()).unwrap().coins, 20);

    let hashes: Vec<_> = chain
        .get_all_blocks()
        .unwrap()
        .into_iter()
        .map(|block| block.hash)
        .collect();
    assert_eq!(hashes.len(), 3);
    assert_eq!(hashes[0], Block::genesis().hash);
    assert_eq!(hashes[2], tip);
}

#[test]
fn test_block_on_wrong_difficulty_is_rejected() {
    let dir = tempdir().unwrap();
    let chain = Blockchain::open(dir.path(), 3).unwrap();
    let tip = chain.get_tip_hash().unwrap();
    let mut block = Block::new(Some(tip), vec![], "validator", 0).unwrap();
    while Block::check_difficulty(&block.hash, 3) {
        block.nonce += 1;
        block.hash = block.calculate_hash();
    }

    let err = chain.post_block(&block).unwrap_err();
    assert!(matches!(err, BlockchainError::InvalidBlock(_)));
    block.hash = "tampered".to_string();
    assert!(chain.post_block(&block).is_err());
    assert_eq!(chain.get_all_blocks().unwrap().len(), 1);
}
