//! Command-line interface
//!
//! Argument parsing only; `main.rs` runs the commands against the
//! network façade.

pub mod commands;

pub use commands::{parse_poll_option, Command, KeyArgs, Opt};
