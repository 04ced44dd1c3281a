//! Data storage and persistence
//!
//! The ledger engine talks to storage through the `Repository` trait;
//! `SledRepository` is the on-disk implementation. Key files live in
//! `encrypted`.

pub mod encrypted;
pub mod repository;
pub mod sled_repository;

pub use encrypted::EncryptedKey;
pub use repository::{BlockCommit, Repository};
pub use sled_repository::SledRepository;
