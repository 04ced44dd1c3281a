// The working set I validate transactions against.
//
// A view lazily copies balances out of the repository, applies
// transactions to those copies and only hands them back for committing
// when everything succeeded. Nothing here writes to storage, so a failed
// block or transaction leaves the authoritative state untouched.

use crate::core::balance::{Balance, PollTally, Ticket};
use crate::core::transaction::{Payload, PollPayload, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::Repository;
use std::collections::{HashMap, HashSet};

/// What the view is validating for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A pending transaction; pending polls count as existing and nonces
    /// must be contiguous
    Pending,
    /// A block; referenced polls must be final or earlier in the block and
    /// votes are tallied
    Block,
}

struct KnownPoll {
    creator: String,
    payload: PollPayload,
}

pub struct LedgerView<'a> {
    repo: &'a dyn Repository,
    mode: Mode,
    balances: HashMap<String, Balance>,
    polls: HashMap<String, KnownPoll>,
    tallies: HashMap<String, PollTally>,
    applied: HashSet<String>,
}

impl<'a> LedgerView<'a> {
    pub fn new(repo: &'a dyn Repository, mode: Mode) -> LedgerView<'a> {
        LedgerView {
            repo,
            mode,
            balances: HashMap::new(),
            polls: HashMap::new(),
            tallies: HashMap::new(),
            applied: HashSet::new(),
        }
    }

    /// The balance as this view currently sees it
    pub fn balance(&mut self, owner: &str) -> Result<&Balance> {
        Ok(self.balance_mut(owner)?)
    }

    fn balance_mut(&mut self, owner: &str) -> Result<&mut Balance> {
        if !self.balances.contains_key(owner) {
            let balance = self
                .repo
                .get_balance(owner)?
                .unwrap_or_else(|| Balance::new(owner));
            self.balances.insert(owner.to_string(), balance.snapshot());
        }
        self.balances
            .get_mut(owner)
            .ok_or_else(|| BlockchainError::Database(format!("Balance for {owner} vanished")))
    }

    /// Checks nonce and content rules, then applies `tx`. On error the view
    /// is unchanged.
    pub fn apply(&mut self, tx: &Transaction) -> Result<()> {
        if !self.applied.insert(tx.signature.clone()) {
            return Err(BlockchainError::InvalidTransaction(format!(
                "transaction {} appears twice",
                tx.signature
            )));
        }
        let result = self.check_nonce(tx).and_then(|_| self.consume(tx));
        match result {
            Ok(()) => {
                let balance = self.balance_mut(&tx.sender)?;
                balance.nonce = balance.nonce.max(tx.nonce);
                Ok(())
            }
            Err(e) => {
                self.applied.remove(&tx.signature);
                Err(e)
            }
        }
    }

    fn check_nonce(&mut self, tx: &Transaction) -> Result<()> {
        let mode = self.mode;
        let current = self.balance_mut(&tx.sender)?.nonce;
        let ok = match mode {
            Mode::Pending => current.checked_add(1) == Some(tx.nonce),
            Mode::Block => tx.nonce > current,
        };
        if ok {
            Ok(())
        } else {
            Err(BlockchainError::InvalidTransaction(format!(
                "nonce {} is not valid after {}",
                tx.nonce, current
            )))
        }
    }

    fn find_poll(&self, signature: &str) -> Result<Option<KnownPoll>> {
        if let Some(poll) = self.polls.get(signature) {
            return Ok(Some(KnownPoll {
                creator: poll.creator.clone(),
                payload: poll.payload.clone(),
            }));
        }
        let stored = match self.repo.get_transaction(signature)? {
            Some(tx) => tx,
            None => return Ok(None),
        };
        if stored.pending && self.mode == Mode::Block {
            return Ok(None);
        }
        match stored.payload {
            Payload::Poll(payload) => Ok(Some(KnownPoll {
                creator: stored.sender,
                payload,
            })),
            _ => Ok(None),
        }
    }

    fn tally_mut(&mut self, poll: &str) -> Result<&mut PollTally> {
        if !self.tallies.contains_key(poll) {
            let tally = self.repo.get_poll_tally(poll)?.ok_or_else(|| {
                BlockchainError::InvalidTransaction(format!("poll {poll} has no tally"))
            })?;
            self.tallies.insert(poll.to_string(), tally);
        }
        self.tallies
            .get_mut(poll)
            .ok_or_else(|| BlockchainError::Database(format!("Tally for {poll} vanished")))
    }

    /// Variant-specific state transition. Every check runs before the first
    /// mutation.
    fn consume(&mut self, tx: &Transaction) -> Result<()> {
        let invalid = |msg: String| Err(BlockchainError::InvalidTransaction(msg));
        let cost = tx.cost();
        let coins = self.balance_mut(&tx.sender)?.coins;
        if coins < cost {
            return invalid(format!(
                "{} transaction costs {cost} coins, sender has {coins}",
                tx.kind()
            ));
        }

        match &tx.payload {
            Payload::Poll(poll) => {
                if poll.options.is_empty() {
                    return invalid("poll has no options".to_string());
                }
                let mut indexes = HashSet::new();
                if !poll.options.iter().all(|option| indexes.insert(option.index)) {
                    return invalid("poll option indexes must be unique".to_string());
                }

                let balance = self.balance_mut(&tx.sender)?;
                balance.coins -= cost;
                balance.polls.push(tx.signature.clone());
                self.polls.insert(
                    tx.signature.clone(),
                    KnownPoll {
                        creator: tx.sender.clone(),
                        payload: poll.clone(),
                    },
                );
                if self.mode == Mode::Block {
                    self.tallies
                        .insert(tx.signature.clone(), PollTally::new(&tx.signature, poll));
                }
            }
            Payload::Ticket(ticket) => {
                let poll = match self.find_poll(&ticket.poll)? {
                    Some(poll) => poll,
                    None => return invalid(format!("unknown poll {}", ticket.poll)),
                };
                if poll.creator != tx.sender {
                    return invalid("only the poll creator can issue tickets".to_string());
                }
                if ticket.owner.is_empty() {
                    return invalid("ticket has no owner".to_string());
                }

                self.balance_mut(&tx.sender)?.coins -= cost;
                self.balance_mut(&ticket.owner)?.unused_tickets.push(Ticket {
                    signature: tx.signature.clone(),
                    poll: ticket.poll.clone(),
                });
            }
            Payload::Vote(vote) => {
                let poll = match self.find_poll(&vote.poll)? {
                    Some(poll) => poll,
                    None => return invalid(format!("unknown poll {}", vote.poll)),
                };
                if !poll.payload.has_option(vote.option) {
                    return invalid(format!("poll has no option {}", vote.option));
                }
                let position = match self.balance_mut(&tx.sender)?.unused_ticket_position(&vote.poll)
                {
                    Some(position) => position,
                    None => return invalid(format!("no unused ticket for poll {}", vote.poll)),
                };
                if self.mode == Mode::Block {
                    // Checked before the ticket moves
                    self.tally_mut(&vote.poll)?;
                }

                let balance = self.balance_mut(&tx.sender)?;
                let ticket = balance.unused_tickets.remove(position);
                balance.used_tickets.push(ticket);
                if self.mode == Mode::Block {
                    self.tally_mut(&vote.poll)?.record_vote(vote.option);
                }
            }
        }
        Ok(())
    }

    /// Credits a validator reward
    pub fn reward(&mut self, validator: &str, coins: u64) -> Result<()> {
        let balance = self.balance_mut(validator)?;
        balance.coins = balance.coins.saturating_add(coins);
        Ok(())
    }

    /// Balances and tallies touched by this view
    pub fn into_changes(self) -> (Vec<Balance>, Vec<PollTally>) {
        (
            self.balances.into_values().collect(),
            self.tallies.into_values().collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::PollOption;
    use crate::storage::{BlockCommit, SledRepository};
    use crate::wallet::Account;
    use crate::core::Block;

    fn poll(account: &Account, nonce: i64) -> Transaction {
        let mut tx = Transaction::new_poll(
            nonce,
            0,
            "Color",
            "Pick one",
            vec![
                PollOption {
                    index: 0,
                    title: "Red".to_string(),
                    description: String::new(),
                },
                PollOption {
                    index: 1,
                    title: "Blue".to_string(),
                    description: String::new(),
                },
            ],
        );
        account.sign(&mut tx).unwrap();
        tx
    }

    fn funded_repo(owner: &str, coins: u64) -> SledRepository {
        let repo = SledRepository::temporary().unwrap();
        let mut balance = Balance::new(owner);
        balance.coins = coins;
        repo.commit_block(&BlockCommit {
            block: Block::genesis(),
            balances: vec![balance],
            tallies: vec![],
            dropped_pending: vec![],
        })
        .unwrap();
        repo
    }

    #[test]
    fn test_poll_needs_coins() {
        let alice = Account::new().unwrap();
        let repo = funded_repo(alice.address(), 9);
        let mut view = LedgerView::new(&repo, Mode::Block);

        let err = view.apply(&poll(&alice, 1)).unwrap_err();
        assert!(matches!(err, BlockchainError::InvalidTransaction(_)));
        assert_eq!(view.balance(alice.address()).unwrap().coins, 9);
        assert_eq!(view.balance(alice.address()).unwrap().nonce, 0);
    }

    #[test]
    fn test_full_poll_lifecycle_in_one_block() {
        let alice = Account::new().unwrap();
        let bob = Account::new().unwrap();
        let repo = funded_repo(alice.address(), 11);
        let mut view = LedgerView::new(&repo, Mode::Block);

        let poll = poll(&alice, 1);
        view.apply(&poll).unwrap();

        let mut ticket = Transaction::new_ticket(2, 0, bob.address(), &poll.signature);
        alice.sign(&mut ticket).unwrap();
        view.apply(&ticket).unwrap();

        let mut vote = Transaction::new_vote(1, 0, &poll.signature, 1);
        bob.sign(&mut vote).unwrap();
        view.apply(&vote).unwrap();

        let bob_balance = view.balance(bob.address()).unwrap().clone();
        assert!(bob_balance.unused_tickets.is_empty());
        assert_eq!(bob_balance.used_tickets.len(), 1);
        assert_eq!(view.balance(alice.address()).unwrap().coins, 0);

        let (_, tallies) = view.into_changes();
        assert_eq!(tallies[0].votes(1), Some(1));
        assert_eq!(tallies[0].votes(0), Some(0));
    }

    #[test]
    fn test_only_creator_issues_tickets() {
        let alice = Account::new().unwrap();
        let mallory = Account::new().unwrap();
        let repo = funded_repo(alice.address(), 20);
        let mut view = LedgerView::new(&repo, Mode::Block);
        let poll = poll(&alice, 1);
        view.apply(&poll).unwrap();

        let mut ticket = Transaction::new_ticket(1, 0, mallory.address(), &poll.signature);
        mallory.sign(&mut ticket).unwrap();
        assert!(view.apply(&ticket).is_err());
    }

    #[test]
    fn test_pending_mode_requires_contiguous_nonce() {
        let alice = Account::new().unwrap();
        let repo = funded_repo(alice.address(), 30);
        let mut view = LedgerView::new(&repo, Mode::Pending);

        assert!(view.apply(&poll(&alice, 2)).is_err());
        view.apply(&poll(&alice, 1)).unwrap();
        assert!(view.apply(&poll(&alice, 3)).is_err());
        view.apply(&poll(&alice, 2)).unwrap();
    }

    #[test]
    fn test_same_transaction_twice_is_rejected() {
        let alice = Account::new().unwrap();
        let repo = funded_repo(alice.address(), 30);
        let mut view = LedgerView::new(&repo, Mode::Block);
        let poll = poll(&alice, 1);

        view.apply(&poll).unwrap();
        assert!(view.apply(&poll).is_err());
    }
}
