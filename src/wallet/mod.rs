//! Account identities
//!
//! Key generation, transaction signing and password-protected key files.

pub mod account;

pub use account::Account;
