//! # Pollchain
//!
//! A peer-to-peer ledger for polls. Accounts are ECDSA P-256 key pairs;
//! spending coins earned as a block validator, an account can open a poll,
//! hand out voting tickets for it and the ticket holders vote with them.
//!
//! ## Layout
//! - `core/`: transactions, blocks, proof-of-work and the ledger engine
//! - `storage/`: the repository trait, its sled implementation and
//!   encrypted key files
//! - `network/`: wire messages, peer sessions and the client/server façade
//! - `wallet/`: accounts and signing
//! - `config/`: node settings
//! - `utils/`: hashing, encoding and signature helpers
//! - `cli/`: command-line arguments
//!
//! Nodes agree on data they did not author by majority: a query goes to
//! every connected full node and the most common answer wins.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

pub use cli::{Command, Opt};
pub use config::Settings;
pub use core::{
    Balance, Block, Blockchain, Payload, PollOption, PollTally, ProofOfWork, Transaction,
};
pub use error::{BlockchainError, Result};
pub use network::{Client, Server};
pub use storage::{Repository, SledRepository};
pub use wallet::Account;
