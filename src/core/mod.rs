//! Core ledger functionality
//!
//! Transactions, blocks, proof-of-work, the balance projection and the
//! ledger engine that ties them together.

pub mod balance;
pub mod block;
pub mod blockchain;
pub mod monetary;
pub mod proof_of_work;
pub mod state;
pub mod transaction;

pub use balance::{Balance, OptionTally, PollTally, Ticket};
pub use block::{Block, BLOCK_VERSION, GENESIS_VALIDATOR};
pub use blockchain::{BlockIterator, Blockchain};
pub use monetary::{block_reward, MAX_PENDING_TRANSACTIONS, POLL_COST, TICKET_COST};
pub use proof_of_work::ProofOfWork;
pub use transaction::{
    Payload, PollOption, PollPayload, TicketPayload, Transaction, VotePayload,
};
